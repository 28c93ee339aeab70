//! Record store
//!
//! A transactional, hierarchically-namespaced key-value store with a single
//! writer and any number of snapshot readers.
//!
//! ## Architecture
//!
//! ```text
//! WriteTx ─ ops ─→ CommitBatch ─→ WalRotator ─→ FileBackend
//!    │                                              ▲
//!    └─ DbState (Arc, published on commit) ─ compact ┘ snapshot
//! ```
//!
//! ## Key Features
//!
//! - **Atomic batches**: one WAL entry per transaction, CRC32 checked
//! - **Snapshot reads**: readers pin an `Arc<DbState>` and never block
//! - **Crash recovery**: newest snapshot plus WAL replay in txid order
//! - **Fault injection**: `SimulatedBackend` for deterministic testing

pub mod backend;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod rng;
pub mod snapshot;
pub mod state;
pub mod tx;
pub mod wal;

pub use backend::{
    BackendReader, BackendWriter, FileBackend, InMemoryBackend, LocalBackend, SimulatedBackend,
    SimulatedBackendConfig, SimulatedBackendStats,
};
pub use codec::{decode_key, decode_record, encode_key, encode_record, KEY_SIZE};
pub use config::{FsyncPolicy, StoreConfig};
pub use db::{CompactStats, Store};
pub use error::StoreError;
pub use snapshot::SnapshotMeta;
pub use state::{Bucket, BucketPath, DbState, Op};
pub use tx::{ReadTx, TxRead, WriteTx};
