//! Snapshots
//!
//! A snapshot is the complete store content at one transaction boundary. It is
//! written by compaction (after which WAL files it covers can be deleted) and
//! is also the backup format: a data directory holding nothing but a snapshot
//! opens to exactly that state.
//!
//! ## File Layout
//!
//! ```text
//! Header (48 bytes)  magic "TSNP", version, flags, pad(2), bucket_count u64,
//!                    created_ms u64, txid u64, reserved(12), header_crc u32
//! Data               data_len u64 LE + bincode [(BucketPath, Bucket)]
//! Footer (16 bytes)  data_crc u32, data_size u64, footer_crc u32
//! ```

use crate::store::backend::{BackendReader, BackendWriter, FileBackend};
use crate::store::error::StoreError;
use crate::store::state::{Bucket, BucketPath, DbState};
use std::io::{Cursor, Read as IoRead, Write as IoWrite};
use tracing::{debug, warn};

const SNAPSHOT_MAGIC: &[u8; 4] = b"TSNP";
const SNAPSHOT_VERSION: u8 = 1;
const SNAPSHOT_HEADER_SIZE: usize = 48;
const SNAPSHOT_FOOTER_SIZE: usize = 16;

/// Metadata carried in the snapshot header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub txid: u64,
    pub bucket_count: u64,
    pub created_ms: u64,
}

#[derive(Debug, Clone)]
struct SnapshotHeader {
    magic: [u8; 4],
    version: u8,
    flags: u8,
    meta: SnapshotMeta,
    header_checksum: u32,
}

impl SnapshotHeader {
    fn new(meta: SnapshotMeta) -> Self {
        let mut header = SnapshotHeader {
            magic: *SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
            flags: 0,
            meta,
            header_checksum: 0,
        };
        header.header_checksum = header.compute_checksum();
        header
    }

    fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.magic);
        hasher.update(&[self.version, self.flags]);
        hasher.update(&self.meta.bucket_count.to_le_bytes());
        hasher.update(&self.meta.created_ms.to_le_bytes());
        hasher.update(&self.meta.txid.to_le_bytes());
        hasher.finalize()
    }

    fn write_to<W: IoWrite>(&self, writer: &mut W) -> Result<(), StoreError> {
        writer.write_all(&self.magic)?;
        writer.write_all(&[self.version, self.flags])?;
        writer.write_all(&[0u8; 2])?;
        writer.write_all(&self.meta.bucket_count.to_le_bytes())?;
        writer.write_all(&self.meta.created_ms.to_le_bytes())?;
        writer.write_all(&self.meta.txid.to_le_bytes())?;
        writer.write_all(&[0u8; 12])?;
        writer.write_all(&self.header_checksum.to_le_bytes())?;
        Ok(())
    }

    fn read_from<R: IoRead>(reader: &mut R) -> Result<Self, StoreError> {
        let mut buf = [0u8; SNAPSHOT_HEADER_SIZE];
        reader.read_exact(&mut buf)?;

        let u64_at = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(b)
        };
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        let mut crc = [0u8; 4];
        crc.copy_from_slice(&buf[44..48]);

        let header = SnapshotHeader {
            magic,
            version: buf[4],
            flags: buf[5],
            meta: SnapshotMeta {
                bucket_count: u64_at(8),
                created_ms: u64_at(16),
                txid: u64_at(24),
            },
            header_checksum: u32::from_le_bytes(crc),
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<(), StoreError> {
        if &self.magic != SNAPSHOT_MAGIC {
            return Err(StoreError::Corruption(format!(
                "Invalid snapshot magic: {:?}",
                self.magic
            )));
        }
        if self.version != SNAPSHOT_VERSION {
            return Err(StoreError::Corruption(format!(
                "Unsupported snapshot version: {}",
                self.version
            )));
        }
        let expected = self.compute_checksum();
        if self.header_checksum != expected {
            return Err(StoreError::Corruption(format!(
                "snapshot header checksum mismatch: expected {:08x}, got {:08x}",
                expected, self.header_checksum
            )));
        }
        Ok(())
    }
}

/// Serialize `state` as a snapshot into `writer`
pub fn write_snapshot<W: IoWrite>(
    writer: &mut W,
    state: &DbState,
    txid: u64,
    created_ms: u64,
) -> Result<u64, StoreError> {
    let data = bincode::serialize(&state.export())?;
    let header = SnapshotHeader::new(SnapshotMeta {
        txid,
        bucket_count: state.bucket_count() as u64,
        created_ms,
    });

    header.write_to(writer)?;
    writer.write_all(&(data.len() as u64).to_le_bytes())?;
    writer.write_all(&data)?;

    let data_checksum = crc32fast::hash(&data);
    let data_size = data.len() as u64;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&data_checksum.to_le_bytes());
    hasher.update(&data_size.to_le_bytes());
    writer.write_all(&data_checksum.to_le_bytes())?;
    writer.write_all(&data_size.to_le_bytes())?;
    writer.write_all(&hasher.finalize().to_le_bytes())?;
    writer.flush()?;

    Ok((SNAPSHOT_HEADER_SIZE + 8 + data.len() + SNAPSHOT_FOOTER_SIZE) as u64)
}

/// Parse and verify a snapshot blob
pub fn read_snapshot(bytes: &[u8]) -> Result<(SnapshotMeta, DbState), StoreError> {
    if bytes.len() < SNAPSHOT_HEADER_SIZE + 8 + SNAPSHOT_FOOTER_SIZE {
        return Err(StoreError::Corruption("snapshot too small".to_string()));
    }
    let mut cursor = Cursor::new(bytes);
    let header = SnapshotHeader::read_from(&mut cursor)?;

    let mut len_buf = [0u8; 8];
    cursor.read_exact(&mut len_buf)?;
    let data_len = usize::try_from(u64::from_le_bytes(len_buf))
        .map_err(|_| StoreError::Corruption("snapshot data length overflow".to_string()))?;
    let data_start = SNAPSHOT_HEADER_SIZE + 8;
    let data_end = data_start
        .checked_add(data_len)
        .filter(|end| end + SNAPSHOT_FOOTER_SIZE <= bytes.len())
        .ok_or_else(|| StoreError::Corruption("snapshot data section truncated".to_string()))?;
    let data = &bytes[data_start..data_end];

    let footer = &bytes[data_end..data_end + SNAPSHOT_FOOTER_SIZE];
    let mut b4 = [0u8; 4];
    let mut b8 = [0u8; 8];
    b4.copy_from_slice(&footer[0..4]);
    let data_checksum = u32::from_le_bytes(b4);
    b8.copy_from_slice(&footer[4..12]);
    let data_size = u64::from_le_bytes(b8);
    b4.copy_from_slice(&footer[12..16]);
    let footer_checksum = u32::from_le_bytes(b4);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&data_checksum.to_le_bytes());
    hasher.update(&data_size.to_le_bytes());
    if hasher.finalize() != footer_checksum {
        return Err(StoreError::Corruption("snapshot footer checksum mismatch".to_string()));
    }
    if data_size != data.len() as u64 || crc32fast::hash(data) != data_checksum {
        return Err(StoreError::Corruption("snapshot data checksum mismatch".to_string()));
    }

    let buckets: Vec<(BucketPath, Bucket)> = bincode::deserialize(data)?;
    if buckets.len() as u64 != header.meta.bucket_count {
        return Err(StoreError::Corruption(format!(
            "snapshot bucket count mismatch: header {}, data {}",
            header.meta.bucket_count,
            buckets.len()
        )));
    }
    Ok((header.meta, DbState::from_buckets(buckets)?))
}

/// Snapshot file naming: snap-{txid:016x}.snap
pub fn snapshot_file_name(txid: u64) -> String {
    format!("snap-{:016x}.snap", txid)
}

pub fn parse_snapshot_txid(name: &str) -> Option<u64> {
    let hex = name.strip_prefix("snap-")?.strip_suffix(".snap")?;
    u64::from_str_radix(hex, 16).ok()
}

/// Write a snapshot file atomically (temp file + rename)
pub fn save_snapshot<S: FileBackend>(
    backend: &S,
    state: &DbState,
    txid: u64,
    created_ms: u64,
) -> Result<String, StoreError> {
    let name = snapshot_file_name(txid);
    let tmp = format!("{}.tmp", name);

    let mut buf = Vec::new();
    write_snapshot(&mut buf, state, txid, created_ms)?;

    let mut writer = backend.create(&tmp)?;
    let written = writer.append(&buf).and_then(|_| writer.sync());
    if let Err(e) = written {
        let _ = backend.delete(&tmp);
        return Err(e);
    }
    backend.rename(&tmp, &name)?;
    debug!(file = %name, bytes = buf.len(), "snapshot written");
    Ok(name)
}

/// Load the newest snapshot, if any.
///
/// Leftover temp files are removed. A newest snapshot that fails
/// verification is an error; older snapshots are never used in its place,
/// since WAL files covered by it may already be gone.
pub fn load_latest_snapshot<S: FileBackend>(
    backend: &S,
) -> Result<Option<(SnapshotMeta, DbState)>, StoreError> {
    let names = backend.list()?;
    for name in names.iter().filter(|n| n.ends_with(".snap.tmp")) {
        warn!(file = %name, "removing incomplete snapshot");
        backend.delete(name)?;
    }

    let latest = names
        .iter()
        .filter_map(|n| Some((parse_snapshot_txid(n)?, n)))
        .max_by_key(|(txid, _)| *txid);
    let Some((_, name)) = latest else {
        return Ok(None);
    };

    let bytes = backend.open_read(name)?.read_all()?;
    let (meta, state) = read_snapshot(&bytes)
        .map_err(|e| StoreError::Corruption(format!("{}: {}", name, e)))?;
    Ok(Some((meta, state)))
}

/// Delete every snapshot older than `keep_txid`
pub fn prune_snapshots<S: FileBackend>(backend: &S, keep_txid: u64) -> Result<usize, StoreError> {
    let mut deleted = 0;
    for name in backend.list()? {
        if matches!(parse_snapshot_txid(&name), Some(txid) if txid < keep_txid) {
            backend.delete(&name)?;
            deleted += 1;
        }
    }
    Ok(deleted)
}
