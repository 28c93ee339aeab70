//! The record store handle
//!
//! ## Commit protocol
//!
//! ```text
//! write(f) ─ writer lock ─ clone committed state ─ f(&mut WriteTx)
//!                                                    │ Err → drop everything
//!                                                    ▼
//!                      WAL append (+ fsync per policy)
//!                                                    │ Err → cut entry, rotate, abort
//!                                                    ▼
//!                              publish Arc<DbState> to readers
//! ```
//!
//! Readers clone the published `Arc` and never wait for the writer.

use crate::store::backend::{FileBackend, LocalBackend};
use crate::store::config::{FsyncPolicy, StoreConfig};
use crate::store::error::StoreError;
use crate::store::snapshot::{
    load_latest_snapshot, parse_snapshot_txid, prune_snapshots, read_snapshot, save_snapshot,
    snapshot_file_name, SnapshotMeta,
};
use crate::store::state::DbState;
use crate::store::tx::{ReadTx, WriteTx};
use crate::store::wal::{parse_wal_sequence, CommitBatch, WalEntry, WalRotator};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::io::Write as IoWrite;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const EVERY_SECOND: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct Committed {
    state: Arc<DbState>,
    txid: u64,
}

struct WriterState<S: FileBackend> {
    wal: WalRotator<S>,
    commits_since_compact: u64,
    last_sync: Instant,
    unsynced: bool,
}

struct StoreInner<S: FileBackend> {
    config: StoreConfig,
    committed: RwLock<Committed>,
    writer: Mutex<WriterState<S>>,
}

impl<S: FileBackend> Drop for StoreInner<S> {
    fn drop(&mut self) {
        let writer = self.writer.get_mut();
        if writer.unsynced {
            if let Err(e) = writer.wal.sync() {
                warn!("WAL final fsync failed: {}", e);
            }
        }
    }
}

/// Outcome of [`Store::compact`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactStats {
    pub txid: u64,
    pub wal_files_removed: usize,
    pub snapshots_removed: usize,
}

/// Transactional, namespaced key-value store. Cheap to clone; all clones
/// share one committed state and one writer.
pub struct Store<S: FileBackend = LocalBackend> {
    inner: Arc<StoreInner<S>>,
}

impl<S: FileBackend> Clone for Store<S> {
    fn clone(&self) -> Self {
        Store {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Store<LocalBackend> {
    /// Open (or create) the store in `config.data_dir`
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let backend = LocalBackend::new(&config.data_dir)?;
        Store::open_with(backend, config)
    }
}

impl<S: FileBackend> Store<S> {
    /// Open the store on an explicit backend, recovering its committed state
    pub fn open_with(backend: S, config: StoreConfig) -> Result<Self, StoreError> {
        let snapshot = load_latest_snapshot(&backend)?;
        let (base_txid, mut state) = match snapshot {
            Some((meta, state)) => (meta.txid, state),
            None => (0, DbState::new()),
        };

        let mut wal = WalRotator::new(backend, config.max_wal_file_size)?;

        // Later files win for a repeated txid: an aborted commit whose bytes
        // survived is superseded by the retry that reused its txid.
        let mut pending: BTreeMap<u64, WalEntry> = BTreeMap::new();
        for entry in wal.recover_all_entries()? {
            if entry.txid > base_txid {
                pending.insert(entry.txid, entry);
            }
        }

        let mut txid = base_txid;
        let mut replayed = 0usize;
        for (entry_txid, entry) in &pending {
            if *entry_txid != txid + 1 {
                warn!(expected = txid + 1, found = entry_txid, "WAL has a gap, stopping replay");
                break;
            }
            let batch = match entry.to_batch() {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(txid = entry_txid, error = %e, "undecodable WAL batch, stopping replay");
                    break;
                }
            };
            let mut next = state.clone();
            if let Err(e) = batch.ops.iter().try_for_each(|op| next.apply(op)) {
                warn!(txid = entry_txid, error = %e, "WAL batch does not apply, stopping replay");
                break;
            }
            state = next;
            txid = *entry_txid;
            replayed += 1;
        }
        let discarded = pending.len() - replayed;

        if discarded > 0 {
            // Entries past the replay point must not resurface once new
            // commits reuse their txids.
            save_snapshot(wal.backend(), &state, txid, now_ms())?;
            wal.truncate_before(u64::MAX)?;
            prune_snapshots(wal.backend(), txid)?;
            warn!(discarded, txid, "dropped unreplayable WAL entries and rewrote snapshot");
        }

        info!(
            snapshot_txid = base_txid,
            replayed,
            txid,
            buckets = state.bucket_count(),
            "store opened"
        );

        Ok(Store {
            inner: Arc::new(StoreInner {
                config,
                committed: RwLock::new(Committed {
                    state: Arc::new(state),
                    txid,
                }),
                writer: Mutex::new(WriterState {
                    wal,
                    commits_since_compact: replayed as u64,
                    last_sync: Instant::now(),
                    unsynced: false,
                }),
            }),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Transaction id of the latest commit
    pub fn txid(&self) -> u64 {
        self.inner.committed.read().txid
    }

    /// Start a read transaction on the current committed state
    pub fn begin_read(&self) -> ReadTx {
        let committed = self.inner.committed.read().clone();
        ReadTx::new(committed.state, committed.txid)
    }

    /// Run `f` against a consistent snapshot
    pub fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&ReadTx) -> Result<T, E>,
    {
        let tx = self.begin_read();
        f(&tx)
    }

    /// Run `f` as one atomic write transaction.
    ///
    /// Nothing is applied when `f` fails or the WAL write fails. A transaction
    /// that performs no mutation commits nothing and consumes no txid.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut WriteTx) -> Result<T, E>,
    {
        let mut writer = self.inner.writer.lock();
        let base = self.inner.committed.read().clone();
        let txid = base.txid + 1;

        let mut tx = WriteTx::new(DbState::clone(&base.state), txid);
        let out = f(&mut tx)?;
        if tx.is_empty() {
            return Ok(out);
        }

        let (state, ops) = tx.into_parts();
        let op_count = ops.len();
        let entry = WalEntry::from_batch(&CommitBatch { txid, ops })?;

        let sync = match self.inner.config.fsync_policy {
            FsyncPolicy::Always => true,
            FsyncPolicy::EverySecond => writer.last_sync.elapsed() >= EVERY_SECOND,
            FsyncPolicy::No => false,
        };
        if let Err(e) = writer.wal.append(&entry, sync) {
            warn!(txid, error = %e, "commit aborted");
            return Err(e.into());
        }
        if sync {
            writer.last_sync = Instant::now();
            writer.unsynced = false;
        } else {
            writer.unsynced = true;
        }

        *self.inner.committed.write() = Committed {
            state: Arc::new(state),
            txid,
        };
        debug!(txid, ops = op_count, bytes = entry.disk_size(), "committed");

        writer.commits_since_compact = writer.commits_since_compact.saturating_add(1);
        let threshold = self.inner.config.compact_after_commits;
        if threshold > 0 && writer.commits_since_compact >= threshold {
            if let Err(e) = self.compact_locked(&mut writer) {
                warn!("automatic compaction failed: {}", e);
            }
        }

        Ok(out)
    }

    /// Snapshot the committed state, then drop the WAL files and older
    /// snapshots it covers
    pub fn compact(&self) -> Result<CompactStats, StoreError> {
        let mut writer = self.inner.writer.lock();
        self.compact_locked(&mut writer)
    }

    fn compact_locked(&self, writer: &mut WriterState<S>) -> Result<CompactStats, StoreError> {
        let committed = self.inner.committed.read().clone();

        writer.wal.seal()?;
        writer.unsynced = false;
        save_snapshot(writer.wal.backend(), &committed.state, committed.txid, now_ms())?;
        let wal_files_removed = writer.wal.truncate_before(committed.txid)?;
        let snapshots_removed = prune_snapshots(writer.wal.backend(), committed.txid)?;
        writer.commits_since_compact = 0;

        info!(
            txid = committed.txid,
            wal_files_removed, snapshots_removed, "compaction complete"
        );
        Ok(CompactStats {
            txid: committed.txid,
            wal_files_removed,
            snapshots_removed,
        })
    }

    /// Write a consistent backup blob of the whole store
    pub fn backup<W: IoWrite>(&self, writer: &mut W) -> Result<u64, StoreError> {
        self.begin_read().write_to(writer)
    }

    /// CRC32 over the committed content
    pub fn digest(&self) -> u32 {
        self.inner.committed.read().state.digest()
    }

    /// Sync outstanding WAL data and close the current log file
    pub fn close(&self) -> Result<(), StoreError> {
        let mut writer = self.inner.writer.lock();
        writer.wal.seal()?;
        writer.unsynced = false;
        Ok(())
    }

    /// Install a backup blob as the content of `backend`, replacing any
    /// snapshots and WAL files already there. Open the store afterwards.
    pub fn restore_backup(backend: &S, backup: &[u8]) -> Result<SnapshotMeta, StoreError> {
        let (meta, state) = read_snapshot(backup)?;
        save_snapshot(backend, &state, meta.txid, meta.created_ms)?;
        let keep = snapshot_file_name(meta.txid);
        for name in backend.list()? {
            let stale = name != keep
                && (parse_wal_sequence(&name).is_some() || parse_snapshot_txid(&name).is_some());
            if stale {
                backend.delete(&name)?;
            }
        }
        info!(txid = meta.txid, buckets = meta.bucket_count, "backup restored");
        Ok(meta)
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::{InMemoryBackend, SimulatedBackend, SimulatedBackendConfig};
    use crate::store::state::BucketPath;
    use crate::store::tx::TxRead;

    fn index() -> BucketPath {
        BucketPath::root("index")
    }

    fn open(backend: &InMemoryBackend) -> Store<InMemoryBackend> {
        Store::open_with(backend.clone(), StoreConfig::test()).unwrap()
    }

    fn put(store: &Store<InMemoryBackend>, value: &[u8]) -> u64 {
        store
            .write(|tx| -> Result<u64, StoreError> {
                tx.create_bucket_if_not_exists(&index())?;
                let id = tx.next_sequence(&index())?;
                tx.put(&index(), &id.to_be_bytes(), value.to_vec())?;
                Ok(id)
            })
            .unwrap()
    }

    #[test]
    fn test_commit_visible_and_durable() {
        let backend = InMemoryBackend::new();
        let store = open(&backend);
        assert_eq!(put(&store, b"a"), 1);
        assert_eq!(put(&store, b"b"), 2);
        assert_eq!(store.txid(), 2);
        let digest = store.digest();
        drop(store);

        backend.simulate_crash();
        let reopened = open(&backend);
        assert_eq!(reopened.txid(), 2);
        assert_eq!(reopened.digest(), digest);
        let value = reopened
            .read(|tx| -> Result<Option<Vec<u8>>, StoreError> {
                Ok(tx.get(&index(), &2u64.to_be_bytes())?.map(|v| v.to_vec()))
            })
            .unwrap();
        assert_eq!(value, Some(b"b".to_vec()));
    }

    #[test]
    fn test_failed_closure_leaves_no_trace() {
        let backend = InMemoryBackend::new();
        let store = open(&backend);
        put(&store, b"a");
        let digest = store.digest();

        let res = store.write(|tx| -> Result<(), StoreError> {
            tx.next_sequence(&index())?;
            tx.put(&index(), b"x", b"y".to_vec())?;
            Err(StoreError::Corruption("abort".to_string()))
        });
        assert!(res.is_err());
        assert_eq!(store.digest(), digest);
        assert_eq!(store.txid(), 1);

        // the sequence value was rolled back with the rest
        assert_eq!(put(&store, b"b"), 2);
    }

    #[test]
    fn test_empty_transaction_commits_nothing() {
        let store = open(&InMemoryBackend::new());
        store.write(|_| -> Result<(), StoreError> { Ok(()) }).unwrap();
        assert_eq!(store.txid(), 0);
    }

    #[test]
    fn test_reader_keeps_its_snapshot() {
        let store = open(&InMemoryBackend::new());
        put(&store, b"a");
        let view = store.begin_read();
        put(&store, b"b");
        assert_eq!(view.len(&index()).unwrap(), 1);
        assert_eq!(store.begin_read().len(&index()).unwrap(), 2);
    }

    #[test]
    fn test_truncated_wal_tail_is_ignored() {
        let backend = InMemoryBackend::new();
        let store = open(&backend);
        put(&store, b"a");
        put(&store, b"b");
        drop(store);

        let wal = crate::store::wal::wal_file_name(1);
        let len = backend.get_file_data(&wal).unwrap().len();
        backend.truncate_file(&wal, len - 3);

        let reopened = open(&backend);
        assert_eq!(reopened.txid(), 1);
        assert_eq!(put(&reopened, b"c"), 2);
        drop(reopened);

        // the retried txid 2 survives another reopen
        let again = open(&backend);
        assert_eq!(again.txid(), 2);
    }

    #[test]
    fn test_compaction_preserves_state() {
        let backend = InMemoryBackend::new();
        let store = open(&backend);
        for i in 0..10u8 {
            put(&store, &[i; 100]);
        }
        let digest = store.digest();
        let stats = store.compact().unwrap();
        assert_eq!(stats.txid, 10);
        assert!(stats.wal_files_removed > 0);
        put(&store, b"after");
        let digest_after = store.digest();
        drop(store);

        let names = backend.list().unwrap();
        assert!(names.contains(&snapshot_file_name(10)));

        let reopened = open(&backend);
        assert_eq!(reopened.txid(), 11);
        assert_eq!(reopened.digest(), digest_after);
        assert_ne!(digest, digest_after);
    }

    #[test]
    fn test_auto_compaction() {
        let backend = InMemoryBackend::new();
        let config = StoreConfig {
            compact_after_commits: 5,
            ..StoreConfig::test()
        };
        let store = Store::open_with(backend.clone(), config).unwrap();
        for _ in 0..12 {
            put(&store, b"v");
        }
        let snaps: Vec<String> = backend
            .list()
            .unwrap()
            .into_iter()
            .filter(|n| n.ends_with(".snap"))
            .collect();
        assert_eq!(snaps, vec![snapshot_file_name(10)]);
    }

    #[test]
    fn test_backup_restore() {
        let store = open(&InMemoryBackend::new());
        put(&store, b"a");
        put(&store, b"b");
        let mut blob = Vec::new();
        store.backup(&mut blob).unwrap();

        let target = InMemoryBackend::new();
        let meta = Store::restore_backup(&target, &blob).unwrap();
        assert_eq!(meta.txid, 2);
        let restored = open(&target);
        assert_eq!(restored.digest(), store.digest());
        assert_eq!(restored.txid(), 2);
    }

    #[test]
    fn test_failed_fsync_aborts_commit() {
        let backend = SimulatedBackend::new(
            9,
            SimulatedBackendConfig {
                fsync_fail_prob: 1.0,
                ..SimulatedBackendConfig::no_faults()
            },
        );
        let store = Store::open_with(backend.clone(), StoreConfig::test()).unwrap();
        let res = store.write(|tx| -> Result<(), StoreError> {
            tx.create_bucket(&index())
        });
        assert!(matches!(res, Err(StoreError::FsyncFailed(_))));
        assert_eq!(store.txid(), 0);
        assert!(!store.begin_read().bucket_exists(&index()));
    }

    #[test]
    fn test_local_store_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::with_data_dir(dir.path());
        {
            let store = Store::open(config.clone()).unwrap();
            store
                .write(|tx| -> Result<(), StoreError> {
                    tx.create_bucket(&index())?;
                    tx.put(&index(), b"k", b"v".to_vec())
                })
                .unwrap();
            store.close().unwrap();
        }
        let store = Store::open(config).unwrap();
        assert_eq!(store.txid(), 1);
        assert!(store.begin_read().bucket_exists(&index()));
    }
}
