//! Book repository
//!
//! The domain layer over the record store. Every public operation is exactly
//! one store transaction, so a failed operation leaves no partial state.
//!
//! ## Namespaces
//!
//! ```text
//! index              book id     → Book
//! fragments/<bid>    fragment id → Fragment
//! versions/<bid>     version id  → TranslationVersion
//! scratchpad         book id     → Scratchpad
//! ```
//!
//! Referential integrity is checked here, not by the store: every mutation
//! re-reads the book record and verifies the fragment/version ids it was
//! given are linked before touching anything.

pub mod books;
pub mod error;
pub mod fragments;
pub mod maintenance;
pub mod model;
pub mod query;
pub mod scratchpad;
pub mod transfer;
pub mod versions;

pub use error::Error;
pub use maintenance::{IntegrityIssue, IntegrityReport, RebuildReport};
pub use model::{Book, BookPage, Fragment, FragmentView, Scratchpad, TranslationVersion};
pub use query::{Filter, LengthCmp, LengthUnit, Limit};

use crate::clock::{Clock, SystemClock};
use crate::store::{
    decode_record, encode_key, encode_record, BucketPath, FileBackend, LocalBackend, Store,
    StoreConfig, StoreError, TxRead, WriteTx,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub(crate) const INDEX: &str = "index";
pub(crate) const FRAGMENTS: &str = "fragments";
pub(crate) const VERSIONS: &str = "versions";
pub(crate) const SCRATCHPAD: &str = "scratchpad";

/// Query behavior settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// A non-zero offset at or past the book's fragment count is an error
    /// instead of an empty page
    pub strict_offsets: bool,
    /// Lowercase both sides of `*-contains` filters
    pub case_insensitive_search: bool,
}

impl Default for RepoConfig {
    fn default() -> Self {
        RepoConfig {
            strict_offsets: true,
            case_insensitive_search: false,
        }
    }
}

/// Handle to the book repository. Cheap to clone.
pub struct Repository<S: FileBackend = LocalBackend> {
    store: Store<S>,
    config: RepoConfig,
    clock: Arc<dyn Clock>,
}

impl<S: FileBackend> Clone for Repository<S> {
    fn clone(&self) -> Self {
        Repository {
            store: self.store.clone(),
            config: self.config.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl Repository<LocalBackend> {
    /// Open the store in `store_config.data_dir` and wrap it
    pub fn open(store_config: StoreConfig, config: RepoConfig) -> Result<Self, Error> {
        Repository::new(Store::open(store_config)?, config)
    }
}

impl<S: FileBackend> Repository<S> {
    /// Wrap a store, creating the top-level namespaces if they are missing
    pub fn new(store: Store<S>, config: RepoConfig) -> Result<Self, Error> {
        store.write(|tx| -> Result<(), Error> {
            for name in [INDEX, FRAGMENTS, VERSIONS, SCRATCHPAD] {
                tx.create_bucket_if_not_exists(&BucketPath::root(name))?;
            }
            Ok(())
        })?;
        info!(txid = store.txid(), "repository ready");
        Ok(Repository {
            store,
            config,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the timestamp source
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store(&self) -> &Store<S> {
        &self.store
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

pub(crate) fn index_bucket() -> BucketPath {
    BucketPath::root(INDEX)
}

pub(crate) fn scratchpad_bucket() -> BucketPath {
    BucketPath::root(SCRATCHPAD)
}

pub(crate) fn fragments_bucket(bid: u64) -> BucketPath {
    BucketPath::root(FRAGMENTS).child(&encode_key(bid))
}

pub(crate) fn versions_bucket(bid: u64) -> BucketPath {
    BucketPath::root(VERSIONS).child(&encode_key(bid))
}

pub(crate) fn load<T, R>(tx: &R, path: &BucketPath, id: u64) -> Result<Option<T>, Error>
where
    T: DeserializeOwned,
    R: TxRead + ?Sized,
{
    Ok(decode_record(tx.get(path, &encode_key(id))?)?)
}

pub(crate) fn save<T: Serialize>(
    tx: &mut WriteTx,
    path: &BucketPath,
    id: u64,
    record: &T,
) -> Result<(), Error> {
    tx.put(path, &encode_key(id), encode_record(record)?)?;
    Ok(())
}

pub(crate) fn load_book<R: TxRead + ?Sized>(tx: &R, bid: u64) -> Result<Book, Error> {
    load(tx, &index_bucket(), bid)?.ok_or(Error::NotFound)
}

/// A book or fragment links a record that is not stored
pub(crate) fn dangling(kind: &str, bid: u64, id: u64) -> Error {
    Error::Store(StoreError::Corruption(format!(
        "book {} links missing {} {}",
        bid, kind, id
    )))
}

/// Load a book and check that `fid` is one of its fragments
pub(crate) fn load_linked_fragment<R: TxRead + ?Sized>(
    tx: &R,
    bid: u64,
    fid: u64,
) -> Result<(Book, Fragment), Error> {
    let book = load_book(tx, bid)?;
    if !book.fragments_ids.contains(&fid) {
        return Err(Error::NotFound);
    }
    let fragment = load(tx, &fragments_bucket(bid), fid)?
        .ok_or_else(|| dangling("fragment", bid, fid))?;
    Ok((book, fragment))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryBackend;

    pub fn repo() -> (Repository<InMemoryBackend>, ManualClock) {
        repo_with(RepoConfig::default())
    }

    pub fn repo_with(config: RepoConfig) -> (Repository<InMemoryBackend>, ManualClock) {
        let store = Store::open_with(InMemoryBackend::new(), StoreConfig::test()).unwrap();
        let clock = ManualClock::default();
        let repo = Repository::new(store, config)
            .unwrap()
            .with_clock(clock.clone());
        (repo, clock)
    }

    pub fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::store::InMemoryBackend;

    #[test]
    fn test_new_creates_namespaces_once() {
        let backend = InMemoryBackend::new();
        let store = Store::open_with(backend.clone(), StoreConfig::test()).unwrap();
        let repo = Repository::new(store, RepoConfig::default()).unwrap();
        assert_eq!(repo.store().txid(), 1);

        let again = Repository::new(repo.store().clone(), RepoConfig::default()).unwrap();
        assert_eq!(again.store().txid(), 1);
        let view = again.store().begin_read();
        for name in [INDEX, FRAGMENTS, VERSIONS, SCRATCHPAD] {
            assert!(view.bucket_exists(&BucketPath::root(name)));
        }
    }

    #[test]
    fn test_linked_fragment_checks_membership() {
        let (repo, _) = repo();
        let bid = repo.create_book("B", &texts(&["a"]), false).unwrap();
        let book = repo.get_book(bid).unwrap();
        let fid = book.fragments_ids[0];

        let view = repo.store().begin_read();
        assert!(load_linked_fragment(&view, bid, fid).is_ok());
        assert!(load_linked_fragment(&view, bid, fid + 1).unwrap_err().is_not_found());
        assert!(load_linked_fragment(&view, bid + 1, fid).unwrap_err().is_not_found());
    }
}
