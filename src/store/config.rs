//! Record store configuration
//!
//! Three fsync policies trade durability against commit latency, the same
//! choice Redis offers with `appendfsync`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Fsync policy for WAL durability guarantees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsyncPolicy {
    /// Fsync before a commit returns. RPO = 0.
    Always,
    /// Fsync at commit time when the last sync is more than a second old,
    /// and on close. RPO ≤ 1 second.
    #[serde(alias = "everysec")]
    EverySecond,
    /// Never fsync explicitly; the OS decides when to flush.
    No,
}

impl Default for FsyncPolicy {
    fn default() -> Self {
        FsyncPolicy::Always
    }
}

impl FromStr for FsyncPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(FsyncPolicy::Always),
            "everysec" | "everysecond" => Ok(FsyncPolicy::EverySecond),
            "no" | "never" => Ok(FsyncPolicy::No),
            other => Err(format!("unknown fsync policy '{}'", other)),
        }
    }
}

/// Configuration for the record store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding WAL and snapshot files
    pub data_dir: PathBuf,
    /// Fsync policy (determines durability vs. latency tradeoff)
    pub fsync_policy: FsyncPolicy,
    /// Maximum WAL file size before rotation (default: 64MB)
    pub max_wal_file_size: usize,
    /// Snapshot + WAL truncation after this many commits, 0 disables
    pub compact_after_commits: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            data_dir: PathBuf::from("data"),
            fsync_policy: FsyncPolicy::Always,
            max_wal_file_size: 64 * 1024 * 1024, // 64MB
            compact_after_commits: 10_000,
        }
    }
}

impl StoreConfig {
    /// Configuration for testing (small files, frequent compaction)
    pub fn test() -> Self {
        StoreConfig {
            data_dir: PathBuf::from("/tmp/tl-store-test"),
            fsync_policy: FsyncPolicy::Always,
            max_wal_file_size: 4 * 1024, // 4KB for fast rotation in tests
            compact_after_commits: 64,
        }
    }

    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        StoreConfig {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.fsync_policy, FsyncPolicy::Always);
        assert_eq!(config.max_wal_file_size, 64 * 1024 * 1024);
        assert_eq!(config.compact_after_commits, 10_000);
    }

    #[test]
    fn test_test_config() {
        let config = StoreConfig::test();
        assert_eq!(config.fsync_policy, FsyncPolicy::Always);
        assert_eq!(config.max_wal_file_size, 4 * 1024);
    }

    #[test]
    fn test_fsync_policy_parse() {
        assert_eq!("always".parse::<FsyncPolicy>(), Ok(FsyncPolicy::Always));
        assert_eq!("EverySec".parse::<FsyncPolicy>(), Ok(FsyncPolicy::EverySecond));
        assert_eq!("no".parse::<FsyncPolicy>(), Ok(FsyncPolicy::No));
        assert!("sometimes".parse::<FsyncPolicy>().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = StoreConfig::with_data_dir("/srv/books");
        let json = serde_json::to_string(&config).unwrap();
        let parsed: StoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.data_dir, PathBuf::from("/srv/books"));
        assert_eq!(parsed.fsync_policy, config.fsync_policy);

        let partial: StoreConfig = serde_json::from_str(r#"{"fsync_policy":"everysec"}"#).unwrap();
        assert_eq!(partial.fsync_policy, FsyncPolicy::EverySecond);
        assert_eq!(partial.max_wal_file_size, 64 * 1024 * 1024);
    }
}
