//! Read and write transactions
//!
//! A [`ReadTx`] pins one committed [`DbState`]. A [`WriteTx`] works on a
//! structurally shared copy of the state and records every mutation as an
//! [`Op`]; the store logs those ops and publishes the copy on commit, or
//! drops both when the transaction body fails.

use crate::store::error::StoreError;
use crate::store::snapshot::write_snapshot;
use crate::store::state::{BucketPath, DbState, Op};
use im::ordmap;
use std::io::Write as IoWrite;
use std::sync::Arc;

/// Read operations shared by both transaction kinds
pub trait TxRead {
    fn state(&self) -> &DbState;

    /// Value stored under `key`, `None` when absent
    fn get(&self, path: &BucketPath, key: &[u8]) -> Result<Option<&[u8]>, StoreError> {
        Ok(self
            .state()
            .require(path)?
            .entries
            .get(key)
            .map(|v| v.as_slice()))
    }

    fn bucket_exists(&self, path: &BucketPath) -> bool {
        self.state().contains(path)
    }

    /// Entries of a bucket in key order; `.rev()` walks newest-first
    fn iter(&self, path: &BucketPath) -> Result<ordmap::Iter<'_, Vec<u8>, Vec<u8>>, StoreError> {
        Ok(self.state().require(path)?.entries.iter())
    }

    fn len(&self, path: &BucketPath) -> Result<usize, StoreError> {
        Ok(self.state().require(path)?.entries.len())
    }

    /// Last ID handed out by the bucket's sequence
    fn sequence(&self, path: &BucketPath) -> Result<u64, StoreError> {
        Ok(self.state().require(path)?.sequence)
    }
}

/// Consistent read-only view of the store
#[derive(Debug, Clone)]
pub struct ReadTx {
    state: Arc<DbState>,
    txid: u64,
}

impl ReadTx {
    pub(crate) fn new(state: Arc<DbState>, txid: u64) -> Self {
        ReadTx { state, txid }
    }

    /// Transaction id of the commit this view reflects
    pub fn txid(&self) -> u64 {
        self.txid
    }

    /// Write the whole view as a snapshot blob (backup format)
    pub fn write_to<W: IoWrite>(&self, writer: &mut W) -> Result<u64, StoreError> {
        let created_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        write_snapshot(writer, &self.state, self.txid, created_ms)
    }
}

impl TxRead for ReadTx {
    fn state(&self) -> &DbState {
        &self.state
    }
}

/// Exclusive read-write transaction
#[derive(Debug)]
pub struct WriteTx {
    state: DbState,
    ops: Vec<Op>,
    txid: u64,
}

impl WriteTx {
    pub(crate) fn new(state: DbState, txid: u64) -> Self {
        WriteTx {
            state,
            ops: Vec::new(),
            txid,
        }
    }

    /// Transaction id this transaction commits as
    pub fn txid(&self) -> u64 {
        self.txid
    }

    fn apply(&mut self, op: Op) -> Result<(), StoreError> {
        self.state.apply(&op)?;
        self.ops.push(op);
        Ok(())
    }

    pub fn put(&mut self, path: &BucketPath, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.apply(Op::Put {
            path: path.clone(),
            key: key.to_vec(),
            value,
        })
    }

    /// Remove a key; removing an absent key is not an error
    pub fn delete(&mut self, path: &BucketPath, key: &[u8]) -> Result<(), StoreError> {
        if !self.state.require(path)?.entries.contains_key(key) {
            return Ok(());
        }
        self.apply(Op::Delete {
            path: path.clone(),
            key: key.to_vec(),
        })
    }

    /// Allocate the next ID of a bucket's sequence
    pub fn next_sequence(&mut self, path: &BucketPath) -> Result<u64, StoreError> {
        let current = self.state.require(path)?.sequence;
        let next = current
            .checked_add(1)
            .ok_or_else(|| StoreError::Corruption(format!("sequence of {} exhausted", path)))?;
        self.apply(Op::SetSequence {
            path: path.clone(),
            sequence: next,
        })?;

        debug_assert!(next > current, "Postcondition: sequence must increase");
        Ok(next)
    }

    pub fn create_bucket(&mut self, path: &BucketPath) -> Result<(), StoreError> {
        self.apply(Op::CreateBucket(path.clone()))
    }

    pub fn create_bucket_if_not_exists(&mut self, path: &BucketPath) -> Result<(), StoreError> {
        if self.state.contains(path) {
            return Ok(());
        }
        self.create_bucket(path)
    }

    /// Delete a bucket and everything nested below it
    pub fn delete_bucket(&mut self, path: &BucketPath) -> Result<(), StoreError> {
        self.apply(Op::DeleteBucket(path.clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn into_parts(self) -> (DbState, Vec<Op>) {
        (self.state, self.ops)
    }
}

impl TxRead for WriteTx {
    fn state(&self) -> &DbState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_tx_logs_ops() {
        let index = BucketPath::root("index");
        let mut tx = WriteTx::new(DbState::new(), 1);
        tx.create_bucket(&index).unwrap();
        tx.create_bucket_if_not_exists(&index).unwrap();
        let id = tx.next_sequence(&index).unwrap();
        tx.put(&index, &id.to_be_bytes(), b"book".to_vec()).unwrap();
        tx.delete(&index, b"missing").unwrap();

        assert_eq!(id, 1);
        assert_eq!(tx.get(&index, &1u64.to_be_bytes()).unwrap(), Some(&b"book"[..]));
        let (_, ops) = tx.into_parts();
        assert_eq!(ops.len(), 3);
    }

    #[test]
    fn test_failed_op_is_not_logged() {
        let mut tx = WriteTx::new(DbState::new(), 1);
        let missing = BucketPath::root("fragments");
        assert!(matches!(
            tx.put(&missing, b"k", b"v".to_vec()),
            Err(StoreError::BucketNotFound(_))
        ));
        assert!(tx.is_empty());
    }

    #[test]
    fn test_iter_order_and_reverse() {
        let index = BucketPath::root("index");
        let mut tx = WriteTx::new(DbState::new(), 1);
        tx.create_bucket(&index).unwrap();
        for id in [3u64, 1, 2] {
            tx.put(&index, &id.to_be_bytes(), vec![id as u8]).unwrap();
        }
        let forward: Vec<u8> = tx.iter(&index).unwrap().map(|(_, v)| v[0]).collect();
        let backward: Vec<u8> = tx.iter(&index).unwrap().rev().map(|(_, v)| v[0]).collect();
        assert_eq!(forward, vec![1, 2, 3]);
        assert_eq!(backward, vec![3, 2, 1]);
        assert_eq!(tx.len(&index).unwrap(), 3);
        assert_eq!(tx.sequence(&index).unwrap(), 0);
    }

    #[test]
    fn test_read_tx_backup_blob() {
        let mut state = DbState::new();
        state.apply(&Op::CreateBucket(BucketPath::root("index"))).unwrap();
        let tx = ReadTx::new(Arc::new(state), 7);

        let mut blob = Vec::new();
        let written = tx.write_to(&mut blob).unwrap();
        assert_eq!(written as usize, blob.len());
        assert!(tx.bucket_exists(&BucketPath::root("index")));
        assert_eq!(tx.txid(), 7);
    }
}
