use chrono::{DateTime, Utc};
use std::path::PathBuf;

use rivulet_core::errors::RedoError;

pub(crate) const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1_000;
pub(crate) const DEFAULT_GC_INTERVAL_MS: u64 = 5_000;
pub(crate) const DEFAULT_MAX_LOG_SIZE_MB: u64 = 64;

/// Configuration of one redo log writer. Immutable for the life of the
/// writer instance.
#[derive(Debug, Clone)]
pub struct LogWriterConfig {
    /// Local directory holding the log and meta files for this stream.
    pub dir: PathBuf,

    /// Stream identity; also the process-wide registry key.
    pub change_feed_id: String,

    /// Process-local tag, embedded in file names so captures sharing a
    /// directory never collide.
    pub capture_id: String,

    /// Rotation threshold for the file writers, in MiB. `0` resolves to 64.
    pub max_log_size: u64,

    /// Creation stamp embedded in file names (unix seconds).
    pub create_time: DateTime<Utc>,

    /// Background flush period in milliseconds. `0` resolves to 1000.
    pub flush_interval_ms: u64,

    /// Background GC period in milliseconds. `0` resolves to 5000.
    pub gc_interval_ms: u64,

    /// When true, log and meta files are mirrored to the remote store
    /// rooted at `cloud_root`.
    pub cloud_storage: bool,

    /// URI-like remote root, e.g. `s3://bucket/prefix`, `file:///var/mirror`
    /// or `memory://ns`. Required when `cloud_storage` is set.
    pub cloud_root: String,
}

impl LogWriterConfig {
    pub fn new(
        dir: impl Into<PathBuf>,
        change_feed_id: impl Into<String>,
        capture_id: impl Into<String>,
    ) -> Self {
        Self {
            dir: dir.into(),
            change_feed_id: change_feed_id.into(),
            capture_id: capture_id.into(),
            max_log_size: DEFAULT_MAX_LOG_SIZE_MB,
            create_time: Utc::now(),
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            gc_interval_ms: DEFAULT_GC_INTERVAL_MS,
            cloud_storage: false,
            cloud_root: String::new(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), RedoError> {
        if self.dir.as_os_str().is_empty() {
            return Err(RedoError::InvalidConfig("dir must not be empty".into()));
        }
        if self.change_feed_id.is_empty() {
            return Err(RedoError::InvalidConfig(
                "change feed id must not be empty".into(),
            ));
        }
        if self.cloud_storage && self.cloud_root.is_empty() {
            return Err(RedoError::InvalidConfig(
                "cloud root required when cloud storage is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Copy of the config with zero-valued knobs resolved to their defaults.
    pub(crate) fn normalized(&self) -> Self {
        let mut cfg = self.clone();
        if cfg.flush_interval_ms == 0 {
            cfg.flush_interval_ms = DEFAULT_FLUSH_INTERVAL_MS;
        }
        if cfg.gc_interval_ms == 0 {
            cfg.gc_interval_ms = DEFAULT_GC_INTERVAL_MS;
        }
        if cfg.max_log_size == 0 {
            cfg.max_log_size = DEFAULT_MAX_LOG_SIZE_MB;
        }
        cfg
    }
}
