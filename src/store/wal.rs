//! Write-Ahead Log - Entry Format, Writer, Reader, Rotator
//!
//! Every committed write transaction becomes exactly one WAL entry holding the
//! transaction's [`CommitBatch`].
//!
//! ## File Layout
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │ Header (16 bytes)                │
//! │ - magic: "TWAL" (4 bytes)        │
//! │ - version: u8                    │
//! │ - flags: u8                      │
//! │ - reserved: 2 bytes              │
//! │ - sequence: u64 LE               │
//! ├──────────────────────────────────┤
//! │ Entry 0                          │
//! │ - data_length: u32 LE            │
//! │ - txid: u64 LE                   │
//! │ - checksum: u32 LE (CRC32)       │
//! │ - data: [u8; data_length]        │
//! ├──────────────────────────────────┤
//! │ Entry 1 ...                      │
//! └──────────────────────────────────┘
//! ```
//!
//! Crash tolerance: each entry is individually CRC32-checksummed.
//! The reader stops at the first corrupted or truncated entry,
//! recovering all fully-written entries before the crash point.

use crate::store::backend::{BackendReader, BackendWriter, FileBackend};
use crate::store::error::StoreError;
use crate::store::state::Op;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// WAL file magic number
pub const WAL_MAGIC: [u8; 4] = *b"TWAL";
/// Current WAL format version
pub const WAL_VERSION: u8 = 1;
/// Header size in bytes
pub const WAL_HEADER_SIZE: usize = 16;
/// Entry overhead: data_length(4) + txid(8) + checksum(4) = 16 bytes
pub const WAL_ENTRY_OVERHEAD: usize = 16;

/// The mutations of one committed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitBatch {
    pub txid: u64,
    pub ops: Vec<Op>,
}

/// A single WAL entry
#[derive(Debug, Clone)]
pub struct WalEntry {
    /// Serialized CommitBatch
    pub data: Vec<u8>,
    /// Transaction id of the batch
    pub txid: u64,
    /// CRC32 checksum of data
    pub checksum: u32,
}

impl WalEntry {
    pub fn from_batch(batch: &CommitBatch) -> Result<Self, StoreError> {
        let data = bincode::serialize(batch)
            .map_err(|e| StoreError::Corruption(format!("serialize batch: {}", e)))?;
        if data.len() > u32::MAX as usize {
            return Err(StoreError::Corruption(format!(
                "batch of {} bytes exceeds entry limit",
                data.len()
            )));
        }
        let checksum = crc32fast::hash(&data);

        debug_assert!(!data.is_empty(), "Postcondition: serialized data must not be empty");

        Ok(WalEntry {
            data,
            txid: batch.txid,
            checksum,
        })
    }

    pub fn to_batch(&self) -> Result<CommitBatch, StoreError> {
        let batch: CommitBatch = bincode::deserialize(&self.data)
            .map_err(|e| StoreError::Corruption(format!("deserialize batch: {}", e)))?;
        if batch.txid != self.txid {
            return Err(StoreError::Corruption(format!(
                "entry txid {} does not match batch txid {}",
                self.txid, batch.txid
            )));
        }
        Ok(batch)
    }

    pub fn validate(&self) -> bool {
        crc32fast::hash(&self.data) == self.checksum
    }

    /// Total size on disk (overhead + data)
    pub fn disk_size(&self) -> usize {
        WAL_ENTRY_OVERHEAD + self.data.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let data_len = self.data.len() as u32;
        let mut buf = Vec::with_capacity(self.disk_size());

        buf.extend_from_slice(&data_len.to_le_bytes());
        buf.extend_from_slice(&self.txid.to_le_bytes());
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf.extend_from_slice(&self.data);

        debug_assert_eq!(
            buf.len(),
            self.disk_size(),
            "Postcondition: encoded size must match expected"
        );

        buf
    }

    /// Decode an entry from bytes. Returns None if data is truncated or corrupt.
    pub fn decode(data: &[u8]) -> Option<(Self, usize)> {
        if data.len() < WAL_ENTRY_OVERHEAD {
            return None;
        }

        let data_len = u32::from_le_bytes(data[0..4].try_into().ok()?) as usize;
        let txid = u64::from_le_bytes(data[4..12].try_into().ok()?);
        let checksum = u32::from_le_bytes(data[12..16].try_into().ok()?);

        let total_size = WAL_ENTRY_OVERHEAD.checked_add(data_len)?;
        if data.len() < total_size {
            return None; // Truncated entry
        }

        let entry_data = data[WAL_ENTRY_OVERHEAD..total_size].to_vec();
        if crc32fast::hash(&entry_data) != checksum {
            return None; // Corrupted entry
        }

        Some((
            WalEntry {
                data: entry_data,
                txid,
                checksum,
            },
            total_size,
        ))
    }
}

// ============================================================================
// WAL Writer
// ============================================================================

/// Writes header + entries to a single WAL file
pub struct WalWriter<W: BackendWriter> {
    writer: W,
    sequence: u64,
    entry_count: u64,
    max_txid: u64,
}

impl<W: BackendWriter> WalWriter<W> {
    /// Create a new WAL writer, writing the header immediately
    pub fn new(mut writer: W, sequence: u64) -> Result<Self, StoreError> {
        let mut header = [0u8; WAL_HEADER_SIZE];
        header[0..4].copy_from_slice(&WAL_MAGIC);
        header[4] = WAL_VERSION;
        header[5] = 0; // flags
        // header[6..8] reserved
        header[8..16].copy_from_slice(&sequence.to_le_bytes());

        writer.append(&header)?;

        Ok(WalWriter {
            writer,
            sequence,
            entry_count: 0,
            max_txid: 0,
        })
    }

    /// Append an entry to the WAL (does NOT fsync)
    pub fn append_entry(&mut self, entry: &WalEntry) -> Result<u64, StoreError> {
        debug_assert!(
            entry.validate(),
            "Precondition: entry checksum must be valid"
        );

        let offset = self.writer.append(&entry.encode())?;
        self.entry_count = self.entry_count.saturating_add(1);
        self.max_txid = self.max_txid.max(entry.txid);
        Ok(offset)
    }

    pub fn sync(&mut self) -> Result<(), StoreError> {
        self.writer.sync()
    }

    pub fn truncate(&mut self, len: u64) -> Result<(), StoreError> {
        self.writer.truncate(len)
    }

    pub fn size(&self) -> u64 {
        self.writer.size()
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn max_txid(&self) -> u64 {
        self.max_txid
    }
}

// ============================================================================
// WAL Reader
// ============================================================================

/// Reads header + entries from a WAL file
#[derive(Debug)]
pub struct WalReader {
    data: Vec<u8>,
    sequence: u64,
}

impl WalReader {
    /// Open a WAL file for reading. Validates the header.
    pub fn open<R: BackendReader>(mut reader: R) -> Result<Self, StoreError> {
        let data = reader.read_all()?;

        if data.len() < WAL_HEADER_SIZE {
            return Err(StoreError::Corruption("WAL file too short for header".to_string()));
        }
        if data[0..4] != WAL_MAGIC {
            return Err(StoreError::Corruption(format!(
                "Invalid WAL magic: {:?}",
                &data[0..4]
            )));
        }
        let version = data[4];
        if version != WAL_VERSION {
            return Err(StoreError::Corruption(format!(
                "Unsupported WAL version: {}",
                version
            )));
        }

        let mut seq = [0u8; 8];
        seq.copy_from_slice(&data[8..16]);
        Ok(WalReader {
            data,
            sequence: u64::from_le_bytes(seq),
        })
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Read all valid entries from the WAL file.
    /// Stops at the first corrupted or truncated entry (crash tolerance).
    pub fn entries(&self) -> Vec<WalEntry> {
        let mut entries = Vec::new();
        let mut offset = WAL_HEADER_SIZE;

        while offset < self.data.len() {
            match WalEntry::decode(&self.data[offset..]) {
                Some((entry, consumed)) => {
                    entries.push(entry);
                    offset += consumed;
                }
                None => {
                    warn!(
                        sequence = self.sequence,
                        offset,
                        dropped_bytes = self.data.len() - offset,
                        "WAL tail is truncated or corrupt, ignoring remainder"
                    );
                    break;
                }
            }
        }

        entries
    }
}

// ============================================================================
// WAL Rotator - manages multiple WAL files
// ============================================================================

/// WAL file naming: wal-{sequence:08x}.wal
pub fn wal_file_name(sequence: u64) -> String {
    format!("wal-{:08x}.wal", sequence)
}

/// Parse sequence number from WAL file name
pub fn parse_wal_sequence(name: &str) -> Option<u64> {
    let name = name.strip_prefix("wal-")?.strip_suffix(".wal")?;
    u64::from_str_radix(name, 16).ok()
}

/// Manages multiple WAL files with rotation and truncation
pub struct WalRotator<S: FileBackend> {
    backend: S,
    max_file_size: usize,
    current_writer: Option<WalWriter<S::Writer>>,
    current_sequence: u64,
}

impl<S: FileBackend> WalRotator<S> {
    /// Create a new WAL rotator. Scans existing files to determine next sequence.
    pub fn new(backend: S, max_file_size: usize) -> Result<Self, StoreError> {
        debug_assert!(
            max_file_size > WAL_HEADER_SIZE,
            "Precondition: max_file_size must be larger than header"
        );

        let max_seq = backend
            .list()?
            .iter()
            .filter_map(|name| parse_wal_sequence(name))
            .max()
            .unwrap_or(0);

        Ok(WalRotator {
            backend,
            max_file_size,
            current_writer: None,
            current_sequence: max_seq,
        })
    }

    /// Append an entry and optionally fsync it, rotating the file if needed.
    ///
    /// On failure the bytes of this entry are cut off again (best effort) and
    /// the file is abandoned, so the next commit starts a clean file.
    pub fn append(&mut self, entry: &WalEntry, sync: bool) -> Result<u64, StoreError> {
        let needs_new_file = match &self.current_writer {
            None => true,
            Some(writer) => writer.size() as usize >= self.max_file_size,
        };
        if needs_new_file {
            self.rotate()?;
        }

        let Some(writer) = self.current_writer.as_mut() else {
            return Err(StoreError::NotFound("current WAL file".to_string()));
        };
        let start = writer.size();

        let result = writer.append_entry(entry).and_then(|_| {
            if sync {
                writer.sync()
            } else {
                Ok(())
            }
        });

        match result {
            Ok(()) => Ok(writer.sequence()),
            Err(e) => {
                if let Err(cut) = writer.truncate(start).and_then(|_| writer.sync()) {
                    warn!(
                        sequence = writer.sequence(),
                        txid = entry.txid,
                        error = %cut,
                        "could not cut aborted WAL entry"
                    );
                }
                self.current_writer = None;
                Err(e)
            }
        }
    }

    /// Fsync the current WAL file
    pub fn sync(&mut self) -> Result<(), StoreError> {
        if let Some(ref mut writer) = self.current_writer {
            writer.sync()?;
        }
        Ok(())
    }

    /// Close the current file; the next append starts a new one
    pub fn seal(&mut self) -> Result<(), StoreError> {
        self.sync()?;
        self.current_writer = None;
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), StoreError> {
        self.current_writer = None;
        self.current_sequence = self.current_sequence.saturating_add(1);

        let name = wal_file_name(self.current_sequence);
        let file_writer = self.backend.create(&name)?;
        self.current_writer = Some(WalWriter::new(file_writer, self.current_sequence)?);
        Ok(())
    }

    /// All entries from all WAL files, in file sequence order.
    /// Entries from each file are read until the first corrupt/truncated entry.
    /// Files with an unreadable header are skipped.
    pub fn recover_all_entries(&self) -> Result<Vec<WalEntry>, StoreError> {
        let mut wal_files: Vec<(u64, String)> = self
            .backend
            .list()?
            .into_iter()
            .filter_map(|name| Some((parse_wal_sequence(&name)?, name)))
            .collect();
        wal_files.sort_by_key(|(seq, _)| *seq);

        let mut all_entries = Vec::new();
        for (_, name) in wal_files {
            let reader = match self.backend.open_read(&name) {
                Ok(r) => r,
                Err(e) => {
                    warn!(file = %name, error = %e, "skipping unreadable WAL file");
                    continue;
                }
            };
            match WalReader::open(reader) {
                Ok(r) => all_entries.extend(r.entries()),
                Err(e) => warn!(file = %name, error = %e, "skipping WAL file with bad header"),
            }
        }

        Ok(all_entries)
    }

    /// Delete WAL files whose entries all have txid <= `up_to_txid`.
    /// The file currently being written is never deleted.
    pub fn truncate_before(&mut self, up_to_txid: u64) -> Result<usize, StoreError> {
        let current_name = self
            .current_writer
            .as_ref()
            .map(|w| wal_file_name(w.sequence()));

        let mut deleted_count = 0;
        for name in self.backend.list()? {
            if parse_wal_sequence(&name).is_none() || Some(&name) == current_name.as_ref() {
                continue;
            }
            let reader = match self.backend.open_read(&name) {
                Ok(r) => r,
                Err(_) => continue,
            };
            let max_txid = match WalReader::open(reader) {
                Ok(r) => r.entries().iter().map(|e| e.txid).max().unwrap_or(0),
                // Header never made it to disk; nothing recoverable inside
                Err(_) => 0,
            };
            if max_txid <= up_to_txid {
                self.backend.delete(&name)?;
                deleted_count += 1;
            }
        }

        Ok(deleted_count)
    }

    pub fn current_sequence(&self) -> u64 {
        self.current_sequence
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }
}
