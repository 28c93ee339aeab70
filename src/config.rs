//! Process configuration
//!
//! Loaded from an optional TOML file, then overridden from the environment:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | TL_DATA_DIR | data | WAL and snapshot directory |
//! | TL_FSYNC | always | Fsync policy: always, everysec, no |
//! | TL_COMPACT_AFTER | 10000 | Commits between automatic compactions, 0 disables |
//! | TL_STRICT_OFFSETS | true | Offset past the end is an error |
//! | TL_CASE_INSENSITIVE | false | Case-folded `*-contains` filters |
//! | TL_LOG_JSON | false | JSON log lines instead of text |
//!
//! ```toml
//! [store]
//! data_dir = "/var/lib/tl"
//! fsync_policy = "everysec"
//!
//! [repo]
//! strict_offsets = false
//! ```

use crate::repo::RepoConfig;
use crate::store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(String),
    InvalidValue { var: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot read config {}: {}", path.display(), source)
            }
            ConfigError::Parse(msg) => write!(f, "invalid config: {}", msg),
            ConfigError::InvalidValue { var, value } => {
                write!(f, "invalid value for {}: '{}'", var, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub repo: RepoConfig,
    pub log: LogConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Read `path` (when given), then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&text)?
            }
            None => Config::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Apply `TL_*` overrides; `lookup` returns a variable's value if set
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("TL_DATA_DIR") {
            self.store.data_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup("TL_FSYNC") {
            self.store.fsync_policy = value
                .parse()
                .map_err(|_| ConfigError::InvalidValue { var: "TL_FSYNC", value })?;
        }
        if let Some(value) = lookup("TL_COMPACT_AFTER") {
            self.store.compact_after_commits = value
                .parse()
                .map_err(|_| ConfigError::InvalidValue { var: "TL_COMPACT_AFTER", value })?;
        }
        if let Some(value) = lookup("TL_STRICT_OFFSETS") {
            self.repo.strict_offsets = parse_flag("TL_STRICT_OFFSETS", value)?;
        }
        if let Some(value) = lookup("TL_CASE_INSENSITIVE") {
            self.repo.case_insensitive_search = parse_flag("TL_CASE_INSENSITIVE", value)?;
        }
        if let Some(value) = lookup("TL_LOG_JSON") {
            self.log.json = parse_flag("TL_LOG_JSON", value)?;
        }
        Ok(())
    }
}

fn parse_flag(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsyncPolicy;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store.fsync_policy, FsyncPolicy::Always);
        assert!(config.repo.strict_offsets);
        assert!(!config.repo.case_insensitive_search);
        assert!(!config.log.json);
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [store]
            data_dir = "/srv/tl"
            fsync_policy = "everysec"

            [repo]
            strict_offsets = false
            "#,
        )
        .unwrap();
        assert_eq!(config.store.data_dir, PathBuf::from("/srv/tl"));
        assert_eq!(config.store.fsync_policy, FsyncPolicy::EverySecond);
        assert_eq!(config.store.compact_after_commits, 10_000);
        assert!(!config.repo.strict_offsets);
    }

    #[test]
    fn test_bad_toml() {
        let err = Config::from_toml_str("[store]\nfsync_policy = \"sometimes\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[
                ("TL_DATA_DIR", "/tmp/x"),
                ("TL_FSYNC", "no"),
                ("TL_COMPACT_AFTER", "0"),
                ("TL_CASE_INSENSITIVE", "yes"),
                ("TL_LOG_JSON", "1"),
            ]))
            .unwrap();
        assert_eq!(config.store.data_dir, PathBuf::from("/tmp/x"));
        assert_eq!(config.store.fsync_policy, FsyncPolicy::No);
        assert_eq!(config.store.compact_after_commits, 0);
        assert!(config.repo.case_insensitive_search);
        assert!(config.repo.strict_offsets);
        assert!(config.log.json);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(env(&[("TL_STRICT_OFFSETS", "maybe")]))
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid value for TL_STRICT_OFFSETS: 'maybe'");

        let err = config.apply_overrides(env(&[("TL_FSYNC", "sometimes")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "TL_FSYNC", .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/tl.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
