//! File Backend Abstraction
//!
//! The store keeps two kinds of files in one flat directory: WAL segments and
//! snapshots. All file I/O goes through the [`FileBackend`] trait so the same
//! store code runs against a real directory, an in-memory map, or a simulated
//! disk that injects faults.
//!
//! ## Implementations
//!
//! - `InMemoryBackend`: For unit tests
//! - `LocalBackend`: For production (std::fs::File + sync_all)
//! - `SimulatedBackend`: For fault-injection runs with a seeded RNG

use crate::store::error::StoreError;
use crate::store::rng::DeterministicRng;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Error as IoError, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Trait for append-only file writers
pub trait BackendWriter: Send {
    /// Append data to the file. Returns the byte offset after the write.
    fn append(&mut self, data: &[u8]) -> Result<u64, StoreError>;
    /// Fsync the file to durable storage.
    fn sync(&mut self) -> Result<(), StoreError>;
    /// Cut the file back to `len` bytes (used to drop an aborted entry).
    fn truncate(&mut self, len: u64) -> Result<(), StoreError>;
    /// Current size of the file in bytes.
    fn size(&self) -> u64;
}

/// Trait for whole-file readers
pub trait BackendReader: Send {
    /// Read the entire file contents.
    fn read_all(&mut self) -> Result<Vec<u8>, StoreError>;
}

/// Trait for storage backends
pub trait FileBackend: Send + Sync + 'static {
    type Writer: BackendWriter;
    type Reader: BackendReader;

    /// Create (or replace) a file for writing.
    fn create(&self, name: &str) -> Result<Self::Writer, StoreError>;
    /// Open an existing file for reading.
    fn open_read(&self, name: &str) -> Result<Self::Reader, StoreError>;
    /// List all file names, sorted alphabetically.
    fn list(&self) -> Result<Vec<String>, StoreError>;
    /// Delete a file. Deleting a missing file is not an error.
    fn delete(&self, name: &str) -> Result<(), StoreError>;
    /// Atomically rename a file, replacing the target.
    fn rename(&self, from: &str, to: &str) -> Result<(), StoreError>;
    /// Check if a file exists.
    fn exists(&self, name: &str) -> Result<bool, StoreError>;
}

// ============================================================================
// InMemoryBackend - For unit tests
// ============================================================================

#[derive(Debug, Clone, Default)]
struct InMemoryFile {
    data: Vec<u8>,
    /// Position up to which data is "synced" (durable)
    synced_pos: usize,
}

/// In-memory backend; clones share the same files
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    files: Arc<Mutex<HashMap<String, InMemoryFile>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the raw bytes of a file (for testing/crash simulation)
    pub fn get_file_data(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).map(|f| f.data.clone())
    }

    /// Replace the raw bytes of a file, creating it if needed
    pub fn set_file_data(&self, name: &str, data: Vec<u8>) {
        let mut files = self.files.lock();
        let synced_pos = data.len();
        files.insert(name.to_string(), InMemoryFile { data, synced_pos });
    }

    /// Truncate a file to a given length (for crash simulation)
    pub fn truncate_file(&self, name: &str, len: usize) {
        if let Some(file) = self.files.lock().get_mut(name) {
            file.data.truncate(len);
            file.synced_pos = file.synced_pos.min(len);
        }
    }

    /// Simulate a crash: truncate all files to their synced position.
    /// Un-synced data is lost (as it would be in a real crash).
    pub fn simulate_crash(&self) {
        for file in self.files.lock().values_mut() {
            file.data.truncate(file.synced_pos);
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }
}

pub struct InMemoryWriter {
    name: String,
    files: Arc<Mutex<HashMap<String, InMemoryFile>>>,
    current_size: u64,
}

impl BackendWriter for InMemoryWriter {
    fn append(&mut self, data: &[u8]) -> Result<u64, StoreError> {
        debug_assert!(!data.is_empty(), "Precondition: data must not be empty");

        let mut files = self.files.lock();
        let file = files
            .get_mut(&self.name)
            .ok_or_else(|| StoreError::NotFound(self.name.clone()))?;
        file.data.extend_from_slice(data);
        self.current_size = file.data.len() as u64;
        Ok(self.current_size)
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        if let Some(file) = self.files.lock().get_mut(&self.name) {
            file.synced_pos = file.data.len();
        }
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> Result<(), StoreError> {
        let mut files = self.files.lock();
        let file = files
            .get_mut(&self.name)
            .ok_or_else(|| StoreError::NotFound(self.name.clone()))?;
        file.data.truncate(len as usize);
        file.synced_pos = file.synced_pos.min(file.data.len());
        self.current_size = file.data.len() as u64;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.current_size
    }
}

pub struct InMemoryReader {
    data: Vec<u8>,
}

impl BackendReader for InMemoryReader {
    fn read_all(&mut self) -> Result<Vec<u8>, StoreError> {
        Ok(std::mem::take(&mut self.data))
    }
}

impl FileBackend for InMemoryBackend {
    type Writer = InMemoryWriter;
    type Reader = InMemoryReader;

    fn create(&self, name: &str) -> Result<Self::Writer, StoreError> {
        debug_assert!(!name.is_empty(), "Precondition: name must not be empty");

        self.files
            .lock()
            .insert(name.to_string(), InMemoryFile::default());
        Ok(InMemoryWriter {
            name: name.to_string(),
            files: Arc::clone(&self.files),
            current_size: 0,
        })
    }

    fn open_read(&self, name: &str) -> Result<Self::Reader, StoreError> {
        let files = self.files.lock();
        let file = files
            .get(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        Ok(InMemoryReader {
            data: file.data.clone(),
        })
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.files.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.files.lock().remove(name);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let mut files = self.files.lock();
        let file = files
            .remove(from)
            .ok_or_else(|| StoreError::NotFound(from.to_string()))?;
        files.insert(to.to_string(), file);
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.files.lock().contains_key(name))
    }
}

// ============================================================================
// LocalBackend - For production
// ============================================================================

/// Local filesystem backend rooted at one directory
#[derive(Debug, Clone)]
pub struct LocalBackend {
    dir: PathBuf,
}

impl LocalBackend {
    /// Create a new local backend. Creates the directory if it doesn't exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(LocalBackend { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Fsync the directory so renames and creations are durable
    fn sync_dir(&self) -> Result<(), StoreError> {
        #[cfg(unix)]
        {
            std::fs::File::open(&self.dir)
                .and_then(|d| d.sync_all())
                .map_err(|e| StoreError::FsyncFailed(e.to_string()))?;
        }
        Ok(())
    }
}

pub struct LocalWriter {
    file: std::fs::File,
    current_size: u64,
}

impl BackendWriter for LocalWriter {
    fn append(&mut self, data: &[u8]) -> Result<u64, StoreError> {
        debug_assert!(!data.is_empty(), "Precondition: data must not be empty");

        let written = self.file.write(data).map_err(StoreError::from)?;
        if written != data.len() {
            return Err(StoreError::PartialWrite {
                expected: data.len(),
                actual: written,
            });
        }
        self.current_size = self
            .current_size
            .checked_add(written as u64)
            .ok_or_else(|| StoreError::Corruption("file size overflow".to_string()))?;

        Ok(self.current_size)
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        self.file
            .sync_all()
            .map_err(|e| StoreError::FsyncFailed(e.to_string()))
    }

    fn truncate(&mut self, len: u64) -> Result<(), StoreError> {
        self.file.set_len(len)?;
        self.file.seek(SeekFrom::Start(len))?;
        self.current_size = len;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.current_size
    }
}

pub struct LocalReader {
    path: PathBuf,
}

impl BackendReader for LocalReader {
    fn read_all(&mut self) -> Result<Vec<u8>, StoreError> {
        std::fs::read(&self.path).map_err(StoreError::from)
    }
}

impl FileBackend for LocalBackend {
    type Writer = LocalWriter;
    type Reader = LocalReader;

    fn create(&self, name: &str) -> Result<Self::Writer, StoreError> {
        debug_assert!(!name.is_empty(), "Precondition: name must not be empty");

        let file = std::fs::File::create(self.file_path(name))?;
        self.sync_dir()?;
        Ok(LocalWriter {
            file,
            current_size: 0,
        })
    }

    fn open_read(&self, name: &str) -> Result<Self::Reader, StoreError> {
        let path = self.file_path(name);
        if !path.exists() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(LocalReader { path })
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.file_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
        std::fs::rename(self.file_path(from), self.file_path(to))?;
        self.sync_dir()
    }

    fn exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.file_path(name).exists())
    }
}

// ============================================================================
// SimulatedBackend - fault injection
// ============================================================================

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedBackendConfig {
    /// Probability of write failure
    pub write_fail_prob: f64,
    /// Probability of partial write
    pub partial_write_prob: f64,
    /// Probability of fsync failure
    pub fsync_fail_prob: f64,
    /// Probability of read corruption
    pub corruption_prob: f64,
    /// Probability of disk full error
    pub disk_full_prob: f64,
}

impl Default for SimulatedBackendConfig {
    fn default() -> Self {
        SimulatedBackendConfig {
            write_fail_prob: 0.01,
            partial_write_prob: 0.005,
            fsync_fail_prob: 0.005,
            corruption_prob: 0.0,
            disk_full_prob: 0.001,
        }
    }
}

impl SimulatedBackendConfig {
    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedBackendConfig {
            write_fail_prob: 0.0,
            partial_write_prob: 0.0,
            fsync_fail_prob: 0.0,
            corruption_prob: 0.0,
            disk_full_prob: 0.0,
        }
    }

    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedBackendConfig {
            write_fail_prob: 0.05,
            partial_write_prob: 0.02,
            fsync_fail_prob: 0.02,
            corruption_prob: 0.0,
            disk_full_prob: 0.005,
        }
    }
}

/// Counters for injected faults
#[derive(Debug, Clone, Default)]
pub struct SimulatedBackendStats {
    pub write_attempts: u64,
    pub write_failures: u64,
    pub partial_writes: u64,
    pub sync_attempts: u64,
    pub sync_failures: u64,
    pub read_attempts: u64,
    pub read_corruptions: u64,
    pub disk_full_errors: u64,
}

struct SimulatedInner {
    rng: DeterministicRng,
    stats: SimulatedBackendStats,
}

/// In-memory backend with seeded fault injection
#[derive(Clone)]
pub struct SimulatedBackend {
    inner: InMemoryBackend,
    config: SimulatedBackendConfig,
    state: Arc<Mutex<SimulatedInner>>,
}

impl SimulatedBackend {
    pub fn new(seed: u64, config: SimulatedBackendConfig) -> Self {
        SimulatedBackend {
            inner: InMemoryBackend::new(),
            config,
            state: Arc::new(Mutex::new(SimulatedInner {
                rng: DeterministicRng::new(seed),
                stats: SimulatedBackendStats::default(),
            })),
        }
    }

    pub fn stats(&self) -> SimulatedBackendStats {
        self.state.lock().stats.clone()
    }

    /// The underlying in-memory files (for crash simulation)
    pub fn inner_backend(&self) -> &InMemoryBackend {
        &self.inner
    }

    /// Turn fault injection off, e.g. for the recovery phase of a run
    pub fn disable_faults(&mut self) {
        self.config = SimulatedBackendConfig::no_faults();
    }
}

pub struct SimulatedWriter {
    inner: InMemoryWriter,
    config: SimulatedBackendConfig,
    state: Arc<Mutex<SimulatedInner>>,
}

impl BackendWriter for SimulatedWriter {
    fn append(&mut self, data: &[u8]) -> Result<u64, StoreError> {
        {
            let mut s = self.state.lock();
            s.stats.write_attempts = s.stats.write_attempts.saturating_add(1);

            if s.rng.gen_bool(self.config.disk_full_prob) {
                s.stats.disk_full_errors = s.stats.disk_full_errors.saturating_add(1);
                return Err(StoreError::DiskFull);
            }

            if s.rng.gen_bool(self.config.write_fail_prob) {
                s.stats.write_failures = s.stats.write_failures.saturating_add(1);
                return Err(StoreError::Io(IoError::new(
                    ErrorKind::Other,
                    "simulated write failure",
                )));
            }

            // Partial write: some bytes land, caller gets an error
            if data.len() > 1 && s.rng.gen_bool(self.config.partial_write_prob) {
                s.stats.partial_writes = s.stats.partial_writes.saturating_add(1);
                let partial_len = s.rng.gen_range(1, data.len() as u64) as usize;
                let _ = self.inner.append(&data[..partial_len]);
                return Err(StoreError::PartialWrite {
                    expected: data.len(),
                    actual: partial_len,
                });
            }
        }

        self.inner.append(data)
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        let mut s = self.state.lock();
        s.stats.sync_attempts = s.stats.sync_attempts.saturating_add(1);

        if s.rng.gen_bool(self.config.fsync_fail_prob) {
            s.stats.sync_failures = s.stats.sync_failures.saturating_add(1);
            return Err(StoreError::FsyncFailed("simulated fsync failure".to_string()));
        }

        drop(s);
        self.inner.sync()
    }

    fn truncate(&mut self, len: u64) -> Result<(), StoreError> {
        self.inner.truncate(len)
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }
}

pub struct SimulatedReader {
    inner: InMemoryReader,
    config: SimulatedBackendConfig,
    state: Arc<Mutex<SimulatedInner>>,
}

impl BackendReader for SimulatedReader {
    fn read_all(&mut self) -> Result<Vec<u8>, StoreError> {
        let mut data = self.inner.read_all()?;
        let mut s = self.state.lock();
        s.stats.read_attempts = s.stats.read_attempts.saturating_add(1);

        if !data.is_empty() && s.rng.gen_bool(self.config.corruption_prob) {
            s.stats.read_corruptions = s.stats.read_corruptions.saturating_add(1);
            let idx = s.rng.gen_range(0, data.len() as u64) as usize;
            data[idx] ^= 0xFF;
        }
        Ok(data)
    }
}

impl FileBackend for SimulatedBackend {
    type Writer = SimulatedWriter;
    type Reader = SimulatedReader;

    fn create(&self, name: &str) -> Result<Self::Writer, StoreError> {
        Ok(SimulatedWriter {
            inner: self.inner.create(name)?,
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        })
    }

    fn open_read(&self, name: &str) -> Result<Self::Reader, StoreError> {
        Ok(SimulatedReader {
            inner: self.inner.open_read(name)?,
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        })
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list()
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.inner.delete(name)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
        self.inner.rename(from, to)
    }

    fn exists(&self, name: &str) -> Result<bool, StoreError> {
        self.inner.exists(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inmemory_create_write_read() {
        let backend = InMemoryBackend::new();

        let mut writer = backend.create("wal-00000000.wal").unwrap();
        writer.append(b"hello").unwrap();
        writer.append(b" world").unwrap();
        assert_eq!(writer.size(), 11);

        let mut reader = backend.open_read("wal-00000000.wal").unwrap();
        assert_eq!(reader.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn test_inmemory_list_sorted() {
        let backend = InMemoryBackend::new();
        backend.create("wal-00000002.wal").unwrap();
        backend.create("wal-00000000.wal").unwrap();
        backend.create("snap-0000000000000001.snap").unwrap();

        assert_eq!(
            backend.list().unwrap(),
            vec![
                "snap-0000000000000001.snap",
                "wal-00000000.wal",
                "wal-00000002.wal"
            ]
        );
    }

    #[test]
    fn test_inmemory_crash_drops_unsynced() {
        let backend = InMemoryBackend::new();
        let mut writer = backend.create("a").unwrap();
        writer.append(b"durable").unwrap();
        writer.sync().unwrap();
        writer.append(b"-lost").unwrap();

        backend.simulate_crash();
        assert_eq!(backend.get_file_data("a").unwrap(), b"durable");
    }

    #[test]
    fn test_inmemory_truncate_and_rename() {
        let backend = InMemoryBackend::new();
        let mut writer = backend.create("tmp").unwrap();
        writer.append(b"0123456789").unwrap();
        writer.truncate(4).unwrap();
        assert_eq!(writer.size(), 4);

        backend.rename("tmp", "final").unwrap();
        assert!(!backend.exists("tmp").unwrap());
        assert_eq!(backend.get_file_data("final").unwrap(), b"0123");
        assert!(matches!(
            backend.open_read("tmp"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().join("data")).unwrap();

        let mut writer = backend.create("wal-00000000.wal").unwrap();
        writer.append(b"hello").unwrap();
        writer.append(b" world").unwrap();
        writer.sync().unwrap();
        writer.truncate(5).unwrap();
        writer.append(b"!").unwrap();
        assert_eq!(writer.size(), 6);

        let mut reader = backend.open_read("wal-00000000.wal").unwrap();
        assert_eq!(reader.read_all().unwrap(), b"hello!");

        backend.rename("wal-00000000.wal", "wal-00000001.wal").unwrap();
        assert_eq!(backend.list().unwrap(), vec!["wal-00000001.wal"]);

        backend.delete("wal-00000001.wal").unwrap();
        backend.delete("wal-00000001.wal").unwrap();
        assert!(!backend.exists("wal-00000001.wal").unwrap());
    }

    #[test]
    fn test_simulated_no_faults() {
        let backend = SimulatedBackend::new(42, SimulatedBackendConfig::no_faults());
        let mut writer = backend.create("f").unwrap();
        writer.append(b"hello").unwrap();
        writer.sync().unwrap();

        let mut reader = backend.open_read("f").unwrap();
        assert_eq!(reader.read_all().unwrap(), b"hello");

        let stats = backend.stats();
        assert_eq!(stats.write_attempts, 1);
        assert_eq!(stats.write_failures, 0);
        assert_eq!(stats.sync_failures, 0);
    }

    #[test]
    fn test_simulated_fsync_failure() {
        let backend = SimulatedBackend::new(
            42,
            SimulatedBackendConfig {
                fsync_fail_prob: 1.0,
                ..SimulatedBackendConfig::no_faults()
            },
        );
        let mut writer = backend.create("f").unwrap();
        writer.append(b"data").unwrap();
        assert!(matches!(writer.sync(), Err(StoreError::FsyncFailed(_))));
        assert_eq!(backend.stats().sync_failures, 1);
    }

    #[test]
    fn test_simulated_deterministic() {
        let config = SimulatedBackendConfig {
            write_fail_prob: 0.3,
            ..SimulatedBackendConfig::no_faults()
        };
        let run = |seed| {
            let backend = SimulatedBackend::new(seed, config.clone());
            let mut writer = backend.create("f").unwrap();
            (0..20)
                .map(|_| writer.append(b"data").is_ok())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(12345), run(12345));
    }
}
