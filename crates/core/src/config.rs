//! Configuration for the journaling engine.
//!
//! All fields have defaults, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! data_dir = "/var/lib/mmj/data"
//! journal_dir = "/var/lib/mmj/data/journal"
//! commit_interval_ms = 0        # 0 = pick 100ms / 30ms by device
//! uncommitted_bytes_limit = 104857600
//! remap_every_n = 10
//! compress = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default commit interval when journal and data files share a device.
pub const DEFAULT_SAME_DEVICE_INTERVAL_MS: u64 = 100;

/// Default commit interval when the journal lives on its own device.
pub const DEFAULT_CROSS_DEVICE_INTERVAL_MS: u64 = 30;

/// Tunables of the durability engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DurabilityConfig {
    /// Directory holding the mapped data files.
    pub data_dir: PathBuf,
    /// Directory holding journal files (defaults to `data_dir/journal`).
    pub journal_dir: Option<PathBuf>,
    /// Commit interval in milliseconds. 0 selects the device-based default.
    pub commit_interval_ms: u64,
    /// Soft budget of buffered intent bytes before an early commit is forced.
    pub uncommitted_bytes_limit: usize,
    /// Every Nth background cycle runs the full-lock path and remaps.
    pub remap_every_n: u32,
    /// Target period for one complete round-robin remap sweep.
    pub remap_sweep_period_ms: u64,
    /// Remap every file on every full-lock cycle.
    pub always_remap: bool,
    /// Compare private and shared views after each full-lock cycle (slow).
    pub paranoid_checks: bool,
    /// zstd-compress section payloads.
    pub compress: bool,
    /// zstd level used when `compress` is set.
    pub compression_level: i32,
    /// Rotate to a new journal file once the current one exceeds this size.
    pub max_journal_file_size: u64,
    /// Interval between data-file flushes (msync + LSN update).
    pub data_file_sync_interval_ms: u64,
    /// How long the limited-locks path waits for its shared lock.
    pub limited_lock_timeout_ms: u64,
    /// How long a shared-write holder waits to upgrade for an early commit.
    pub upgrade_timeout_ms: u64,
    /// Rotation interval of the statistics window.
    pub stats_interval_ms: u64,
    /// Initial capacity of the section builder.
    pub builder_capacity: usize,
}

impl Default for DurabilityConfig {
    fn default() -> Self {
        DurabilityConfig {
            data_dir: PathBuf::from("data"),
            journal_dir: None,
            commit_interval_ms: 0,
            uncommitted_bytes_limit: 100 * 1024 * 1024,
            remap_every_n: 10,
            remap_sweep_period_ms: 2_000,
            always_remap: false,
            paranoid_checks: false,
            compress: true,
            compression_level: 1,
            max_journal_file_size: 1024 * 1024 * 1024,
            data_file_sync_interval_ms: 60_000,
            limited_lock_timeout_ms: 100,
            upgrade_timeout_ms: 20,
            stats_interval_ms: 3_000,
            builder_capacity: 4 * 1024 * 1024,
        }
    }
}

impl DurabilityConfig {
    /// Configuration rooted at `data_dir` with every other field defaulted.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        DurabilityConfig {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: DurabilityConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.uncommitted_bytes_limit == 0 {
            return Err(Error::Config(
                "uncommitted_bytes_limit must be positive".to_string(),
            ));
        }
        if self.remap_every_n == 0 {
            return Err(Error::Config("remap_every_n must be at least 1".to_string()));
        }
        if self.remap_sweep_period_ms == 0 {
            return Err(Error::Config(
                "remap_sweep_period_ms must be positive".to_string(),
            ));
        }
        if self.max_journal_file_size < 64 * 1024 {
            return Err(Error::Config(
                "max_journal_file_size must be at least 64 KiB".to_string(),
            ));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(Error::Config(format!(
                "compression_level {} outside 1..=22",
                self.compression_level
            )));
        }
        Ok(())
    }

    /// Journal directory, defaulting to `data_dir/journal`.
    pub fn journal_dir(&self) -> PathBuf {
        self.journal_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("journal"))
    }

    /// Effective commit interval given whether journal and data share a device.
    pub fn commit_interval(&self, same_device: bool) -> Duration {
        let ms = match self.commit_interval_ms {
            0 if same_device => DEFAULT_SAME_DEVICE_INTERVAL_MS,
            0 => DEFAULT_CROSS_DEVICE_INTERVAL_MS,
            ms => ms,
        };
        Duration::from_millis(ms)
    }

    /// Limited-locks acquisition timeout.
    pub fn limited_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.limited_lock_timeout_ms)
    }

    /// Shared-write to exclusive-write upgrade timeout.
    pub fn upgrade_timeout(&self) -> Duration {
        Duration::from_millis(self.upgrade_timeout_ms)
    }

    /// Period of one complete remap sweep.
    pub fn remap_sweep_period(&self) -> Duration {
        Duration::from_millis(self.remap_sweep_period_ms)
    }

    /// Interval between data-file flushes.
    pub fn data_file_sync_interval(&self) -> Duration {
        Duration::from_millis(self.data_file_sync_interval_ms)
    }

    /// Rotation interval of the statistics window.
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DurabilityConfig::default();
        assert_eq!(config.remap_every_n, 10);
        assert_eq!(config.uncommitted_bytes_limit, 100 * 1024 * 1024);
        assert!(config.validate().is_ok());
        assert_eq!(config.journal_dir(), PathBuf::from("data").join("journal"));
    }

    #[test]
    fn test_commit_interval_by_device() {
        let mut config = DurabilityConfig::default();
        assert_eq!(config.commit_interval(true), Duration::from_millis(100));
        assert_eq!(config.commit_interval(false), Duration::from_millis(30));
        config.commit_interval_ms = 7;
        assert_eq!(config.commit_interval(true), Duration::from_millis(7));
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = DurabilityConfig::parse(
            r#"
            data_dir = "/tmp/mmj"
            remap_every_n = 4
            compress = false
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/mmj"));
        assert_eq!(config.remap_every_n, 4);
        assert!(!config.compress);
        assert_eq!(config.stats_interval_ms, 3_000);
    }

    #[test]
    fn test_parse_rejects_invalid() {
        let err = DurabilityConfig::parse("remap_every_n = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let err = DurabilityConfig::parse("uncommitted_bytes_limit = \"lots\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("dur.toml");
        std::fs::write(&path, "commit_interval_ms = 25\n").unwrap();
        let config = DurabilityConfig::from_file(&path).unwrap();
        assert_eq!(config.commit_interval(true), Duration::from_millis(25));
    }
}
