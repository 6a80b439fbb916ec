//! Engine configuration

use std::path::PathBuf;
use std::time::Duration;

use stowlog_core::DAY_MILLIS;

use crate::error::{StorageError, StorageResult};

/// Largest plaintext batch a buffer may accumulate before it must flush
pub const MAX_BATCH_BYTES: usize = 4 * 1024 * 1024;

/// Smallest usable cache journal (header plus one small frame)
pub const MIN_CACHE_CAPACITY: usize = 1024;

/// When buffered records are turned into a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Every record becomes its own frame as soon as it is written
    Immediate,
    /// Records accumulate until `max_bytes` of plaintext is pending or the
    /// oldest pending record is `max_delay` old
    Batched { max_bytes: usize, max_delay: Duration },
}

impl Default for FlushPolicy {
    fn default() -> Self {
        FlushPolicy::Batched {
            max_bytes: 16 * 1024,
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Size, cadence and retention limits for log files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Maximum size of a single log file before a new one is opened
    pub max_file_size: u64,
    /// Files whose creation time is older than this many days are swept
    pub retention_days: u32,
    /// Length of a time window, anchored at the first write (milliseconds)
    pub cadence_millis: i64,
}

impl RotationPolicy {
    /// Oldest creation time a file may have and survive a sweep at `now`
    pub fn retention_horizon(&self, now_millis: i64) -> i64 {
        now_millis - i64::from(self.retention_days) * DAY_MILLIS
    }
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024, // 10MB
            retention_days: 7,
            cadence_millis: DAY_MILLIS,
        }
    }
}

/// Configuration for a [`FileEngine`](crate::FileEngine)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the cache journal
    pub cache_dir: PathBuf,
    /// Directory holding the log files
    pub log_dir: PathBuf,
    /// Maximum size of a single log file
    pub max_file_size: u64,
    /// Retention horizon in days
    pub retention_days: u32,
    /// When buffered records are encoded and appended
    pub flush_policy: FlushPolicy,
    /// Whether to sync the active file after every append
    pub sync_on_write: bool,
    /// Size of the memory-mapped cache journal
    pub cache_capacity: usize,
    /// Minimum time between two periodic retention sweeps
    pub sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./data/cache"),
            log_dir: PathBuf::from("./data/logs"),
            max_file_size: 10 * 1024 * 1024, // 10MB
            retention_days: 7,
            flush_policy: FlushPolicy::default(),
            sync_on_write: true,
            cache_capacity: 150 * 1024, // 150KB
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl EngineConfig {
    /// Create a configuration rooted at the given directories
    pub fn new(cache_dir: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            log_dir: log_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    pub fn with_cache_capacity(mut self, bytes: usize) -> Self {
        self.cache_capacity = bytes;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Rotation limits derived from this configuration
    pub fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy {
            max_file_size: self.max_file_size,
            retention_days: self.retention_days,
            cadence_millis: DAY_MILLIS,
        }
    }

    /// Check the configuration before an engine is initialized
    pub fn validate(&self) -> StorageResult<()> {
        if self.log_dir.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath("log directory is empty".into()));
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath("cache directory is empty".into()));
        }
        if self.log_dir.is_file() {
            return Err(StorageError::InvalidPath(format!(
                "{} is a file",
                self.log_dir.display()
            )));
        }
        if self.max_file_size == 0 {
            return Err(StorageError::InvalidConfig("max_file_size must be non-zero".into()));
        }
        if self.retention_days == 0 {
            return Err(StorageError::InvalidConfig("retention_days must be non-zero".into()));
        }
        if self.cache_capacity < MIN_CACHE_CAPACITY {
            return Err(StorageError::InvalidConfig(format!(
                "cache_capacity must be at least {MIN_CACHE_CAPACITY} bytes"
            )));
        }
        if let FlushPolicy::Batched { max_bytes, .. } = self.flush_policy {
            if max_bytes == 0 || max_bytes > MAX_BATCH_BYTES {
                return Err(StorageError::InvalidConfig(format!(
                    "batch size must be between 1 and {MAX_BATCH_BYTES} bytes"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.cache_capacity, 150 * 1024);
        assert!(config.sync_on_write);
        assert!(config.validate().is_ok());

        let policy = config.rotation_policy();
        assert_eq!(policy.cadence_millis, DAY_MILLIS);
    }

    #[test]
    fn test_builder_methods() {
        let config = EngineConfig::new("/tmp/c", "/tmp/l")
            .with_max_file_size(1024)
            .with_retention_days(2)
            .with_flush_policy(FlushPolicy::Immediate)
            .with_sync_on_write(false)
            .with_cache_capacity(4096)
            .with_sweep_interval(Duration::from_secs(10));

        assert_eq!(config.log_dir, PathBuf::from("/tmp/l"));
        assert_eq!(config.max_file_size, 1024);
        assert_eq!(config.flush_policy, FlushPolicy::Immediate);
        assert_eq!(config.sweep_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = EngineConfig::new("/tmp/c", "/tmp/l");
        assert!(matches!(
            EngineConfig::new("/tmp/c", "").validate(),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(base.clone().with_max_file_size(0).validate().is_err());
        assert!(base.clone().with_retention_days(0).validate().is_err());
        assert!(base.clone().with_cache_capacity(10).validate().is_err());
        assert!(
            base.with_flush_policy(FlushPolicy::Batched {
                max_bytes: 0,
                max_delay: Duration::from_secs(1),
            })
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_retention_horizon() {
        let policy = RotationPolicy::default();
        assert_eq!(policy.retention_horizon(8 * DAY_MILLIS), DAY_MILLIS);
    }
}
