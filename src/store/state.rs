//! In-memory namespace tree
//!
//! The committed state is a persistent ordered map from [`BucketPath`] to a
//! [`Bucket`], and each bucket keeps its entries in a persistent ordered map
//! too. Readers hold an `Arc<DbState>`; a writer clones it in constant time
//! and every put or delete copies only the tree path down to the touched
//! entry, so a commit costs O(log n) per record written regardless of how
//! large the bucket is.
//!
//! Every mutation is expressed as an [`Op`] and goes through
//! [`DbState::apply`], both for live transactions and for WAL replay.

use crate::store::error::StoreError;
use im::OrdMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hierarchical namespace name: one byte-string per level
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketPath(Vec<Vec<u8>>);

impl BucketPath {
    /// Top-level bucket
    pub fn root(name: &str) -> Self {
        BucketPath(vec![name.as_bytes().to_vec()])
    }

    /// Nested bucket under `self`
    pub fn child(&self, segment: &[u8]) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_vec());
        BucketPath(segments)
    }

    pub fn parent(&self) -> Option<BucketPath> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(BucketPath(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn segments(&self) -> &[Vec<u8>] {
        &self.0
    }

    /// True when `other` is nested (at any depth) below `self`
    pub fn is_ancestor_of(&self, other: &BucketPath) -> bool {
        other.0.len() > self.0.len() && other.0.starts_with(&self.0)
    }
}

impl fmt::Display for BucketPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            match std::str::from_utf8(segment) {
                Ok(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_graphic()) => f.write_str(s)?,
                _ if segment.len() == 8 => {
                    let mut id = [0u8; 8];
                    id.copy_from_slice(segment);
                    write!(f, "{}", u64::from_be_bytes(id))?
                }
                _ => {
                    for b in segment {
                        write!(f, "{:02x}", b)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// One namespace: a sorted key/value map plus its ID sequence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub sequence: u64,
    pub entries: OrdMap<Vec<u8>, Vec<u8>>,
}

/// A single logged mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    CreateBucket(BucketPath),
    DeleteBucket(BucketPath),
    Put {
        path: BucketPath,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        path: BucketPath,
        key: Vec<u8>,
    },
    SetSequence {
        path: BucketPath,
        sequence: u64,
    },
}

/// Full store content at one transaction boundary
#[derive(Debug, Clone, Default)]
pub struct DbState {
    buckets: OrdMap<BucketPath, Bucket>,
}

impl DbState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket(&self, path: &BucketPath) -> Option<&Bucket> {
        self.buckets.get(path)
    }

    pub fn require(&self, path: &BucketPath) -> Result<&Bucket, StoreError> {
        self.bucket(path)
            .ok_or_else(|| StoreError::BucketNotFound(path.to_string()))
    }

    pub fn contains(&self, path: &BucketPath) -> bool {
        self.buckets.contains_key(path)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Iterate all buckets in path order
    pub fn buckets(&self) -> impl Iterator<Item = (&BucketPath, &Bucket)> {
        self.buckets.iter()
    }

    /// Direct children of `path`
    pub fn children<'a>(&'a self, path: &'a BucketPath) -> impl Iterator<Item = &'a BucketPath> + 'a {
        self.buckets
            .range(path.clone()..)
            .map(|(p, _)| p)
            .skip_while(move |p| *p == path)
            .take_while(move |p| path.is_ancestor_of(p))
            .filter(move |p| p.depth() == path.depth() + 1)
    }

    fn bucket_mut(&mut self, path: &BucketPath) -> Result<&mut Bucket, StoreError> {
        self.buckets
            .get_mut(path)
            .ok_or_else(|| StoreError::BucketNotFound(path.to_string()))
    }

    /// Apply one mutation. Validation failures leave the state untouched.
    pub fn apply(&mut self, op: &Op) -> Result<(), StoreError> {
        match op {
            Op::CreateBucket(path) => {
                if self.buckets.contains_key(path) {
                    return Err(StoreError::BucketExists(path.to_string()));
                }
                if let Some(parent) = path.parent() {
                    if !self.buckets.contains_key(&parent) {
                        return Err(StoreError::BucketNotFound(parent.to_string()));
                    }
                }
                self.buckets.insert(path.clone(), Bucket::default());
            }
            Op::DeleteBucket(path) => {
                if !self.buckets.contains_key(path) {
                    return Err(StoreError::BucketNotFound(path.to_string()));
                }
                let doomed: Vec<BucketPath> = self
                    .buckets
                    .range(path.clone()..)
                    .map(|(p, _)| p)
                    .take_while(|p| *p == path || path.is_ancestor_of(p))
                    .cloned()
                    .collect();
                for p in doomed {
                    self.buckets.remove(&p);
                }
            }
            Op::Put { path, key, value } => {
                let bucket = self.bucket_mut(path)?;
                bucket.entries.insert(key.clone(), value.clone());
            }
            Op::Delete { path, key } => {
                let bucket = self.bucket_mut(path)?;
                bucket.entries.remove(key);
            }
            Op::SetSequence { path, sequence } => {
                let bucket = self.bucket_mut(path)?;
                if *sequence < bucket.sequence {
                    return Err(StoreError::Corruption(format!(
                        "sequence of {} moves backwards: {} -> {}",
                        path, bucket.sequence, sequence
                    )));
                }
                bucket.sequence = *sequence;
            }
        }
        Ok(())
    }

    /// CRC32 over the full ordered content
    pub fn digest(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for (path, bucket) in self.buckets.iter() {
            for segment in path.segments() {
                hasher.update(&(segment.len() as u64).to_le_bytes());
                hasher.update(segment);
            }
            hasher.update(&bucket.sequence.to_le_bytes());
            for (k, v) in bucket.entries.iter() {
                hasher.update(&(k.len() as u64).to_le_bytes());
                hasher.update(k);
                hasher.update(&(v.len() as u64).to_le_bytes());
                hasher.update(v);
            }
        }
        hasher.finalize()
    }

    /// Borrowed view used for snapshot serialization
    pub fn export(&self) -> Vec<(&BucketPath, &Bucket)> {
        self.buckets.iter().collect()
    }

    /// Rebuild a state from a deserialized snapshot payload
    pub fn from_buckets(buckets: Vec<(BucketPath, Bucket)>) -> Result<Self, StoreError> {
        let mut state = DbState::new();
        for (path, bucket) in buckets {
            if let Some(parent) = path.parent() {
                if !state.buckets.contains_key(&parent) {
                    return Err(StoreError::Corruption(format!(
                        "snapshot bucket {} precedes its parent",
                        path
                    )));
                }
            }
            if state.buckets.insert(path.clone(), bucket).is_some() {
                return Err(StoreError::Corruption(format!("duplicate snapshot bucket {}", path)));
            }
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(path: &BucketPath, k: &[u8], v: &[u8]) -> Op {
        Op::Put {
            path: path.clone(),
            key: k.to_vec(),
            value: v.to_vec(),
        }
    }

    #[test]
    fn test_path_display() {
        let path = BucketPath::root("fragments").child(&7u64.to_be_bytes());
        assert_eq!(path.to_string(), "fragments/7");
        assert_eq!(path.parent(), Some(BucketPath::root("fragments")));
        assert!(BucketPath::root("fragments").is_ancestor_of(&path));
        assert!(!BucketPath::root("fragment").is_ancestor_of(&path));
    }

    #[test]
    fn test_nested_create_requires_parent() {
        let mut state = DbState::new();
        let child = BucketPath::root("versions").child(b"x");
        assert!(matches!(
            state.apply(&Op::CreateBucket(child.clone())),
            Err(StoreError::BucketNotFound(_))
        ));
        state.apply(&Op::CreateBucket(BucketPath::root("versions"))).unwrap();
        state.apply(&Op::CreateBucket(child.clone())).unwrap();
        assert!(matches!(
            state.apply(&Op::CreateBucket(child)),
            Err(StoreError::BucketExists(_))
        ));
    }

    #[test]
    fn test_delete_bucket_is_recursive() {
        let mut state = DbState::new();
        let root = BucketPath::root("fragments");
        let a = root.child(b"a");
        let b = root.child(b"b");
        let other = BucketPath::root("index");
        for op in [
            Op::CreateBucket(root.clone()),
            Op::CreateBucket(a.clone()),
            Op::CreateBucket(b.clone()),
            Op::CreateBucket(other.clone()),
            put(&a, b"k", b"v"),
        ] {
            state.apply(&op).unwrap();
        }
        assert_eq!(state.children(&root).count(), 2);

        state.apply(&Op::DeleteBucket(root.clone())).unwrap();
        assert!(!state.contains(&root));
        assert!(!state.contains(&a));
        assert!(!state.contains(&b));
        assert!(state.contains(&other));
    }

    #[test]
    fn test_clone_is_copy_on_write() {
        let mut state = DbState::new();
        let path = BucketPath::root("index");
        state.apply(&Op::CreateBucket(path.clone())).unwrap();
        state.apply(&put(&path, b"1", b"one")).unwrap();

        let before = state.clone();
        state.apply(&put(&path, b"2", b"two")).unwrap();

        assert_eq!(before.bucket(&path).unwrap().entries.len(), 1);
        assert_eq!(state.bucket(&path).unwrap().entries.len(), 2);
        assert_ne!(before.digest(), state.digest());
    }

    #[test]
    fn test_write_to_large_bucket_leaves_snapshot_intact() {
        let mut state = DbState::new();
        let path = BucketPath::root("fragments").child(&1u64.to_be_bytes());
        state.apply(&Op::CreateBucket(BucketPath::root("fragments"))).unwrap();
        state.apply(&Op::CreateBucket(path.clone())).unwrap();
        for id in 0u64..20_000 {
            state.apply(&put(&path, &id.to_be_bytes(), b"text")).unwrap();
        }
        let pinned = state.clone();
        let digest = pinned.digest();

        for round in 0u64..500 {
            let mut next = state.clone();
            next.apply(&put(&path, &(round % 20_000).to_be_bytes(), b"edited")).unwrap();
            state = next;
        }

        let key = 7u64.to_be_bytes();
        assert_eq!(pinned.bucket(&path).unwrap().entries.get(&key[..]).unwrap(), b"text");
        assert_eq!(state.bucket(&path).unwrap().entries.get(&key[..]).unwrap(), b"edited");
        assert_eq!(state.bucket(&path).unwrap().entries.len(), 20_000);
        assert_eq!(pinned.digest(), digest);
    }

    #[test]
    fn test_sequence_cannot_go_backwards() {
        let mut state = DbState::new();
        let path = BucketPath::root("index");
        state.apply(&Op::CreateBucket(path.clone())).unwrap();
        state
            .apply(&Op::SetSequence { path: path.clone(), sequence: 5 })
            .unwrap();
        let err = state
            .apply(&Op::SetSequence { path, sequence: 4 })
            .unwrap_err();
        assert!(err.is_corruption());
    }
}
