use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use rivulet_core::errors::RedoError;

pub(crate) const META_EXT: &str = ".meta";
pub(crate) const DEFAULT_META_FILE_TYPE: &str = "meta";

/// Canonical meta file name for one stream:
/// `{capture_id}_{change_feed_id}_meta.meta`.
pub fn meta_file_name(capture_id: &str, change_feed_id: &str) -> String {
    format!(
        "{}_{}_{}{}",
        capture_id, change_feed_id, DEFAULT_META_FILE_TYPE, META_EXT
    )
}

/// Authoritative watermark record for one redo stream. Recovery replays
/// records whose commit timestamp lies between `checkpoint_ts` and
/// `resolved_ts` (or the per-table entry when recovering a single table).
///
/// The writer overwrites rather than rejects a regressing timestamp; the
/// upstream resolver owns monotonicity. Added fields must be trailing
/// `Option`s so older files keep decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMeta {
    /// Greatest timestamp confirmed delivered downstream.
    pub checkpoint_ts: u64,
    /// Greatest timestamp below which no further events will arrive.
    pub resolved_ts: u64,
    /// Per-table resolved timestamps, keyed by upstream table id.
    pub resolved_ts_list: BTreeMap<i64, u64>,
}

impl LogMeta {
    pub fn encode(&self) -> Result<Vec<u8>, RedoError> {
        bincode::serialize(self)
            .map_err(|e| RedoError::Codec(format!("meta serialize failed: {}", e)))
    }

    /// Rejects truncated input: bincode errors out when the buffer ends
    /// before the record does.
    pub fn decode(bytes: &[u8]) -> Result<Self, RedoError> {
        bincode::deserialize(bytes)
            .map_err(|e| RedoError::Codec(format!("meta deserialize failed: {}", e)))
    }
}

/// Atomically persist encoded meta bytes via tmp + rename in the target
/// directory.
pub(crate) async fn write_meta_to_path(path: &Path, bytes: &[u8]) -> Result<(), RedoError> {
    let tmp = path.with_extension("meta.tmp");
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .await
        .map_err(|e| {
            warn!(target = "redo_writer", path = %tmp.display(), error = %e, "open meta tmp failed");
            RedoError::Io(format!("open meta tmp failed: {}", e))
        })?;
    f.write_all(bytes)
        .await
        .map_err(|e| RedoError::Io(format!("write meta failed: {}", e)))?;
    f.flush()
        .await
        .map_err(|e| RedoError::Io(format!("flush meta failed: {}", e)))?;
    f.sync_all()
        .await
        .map_err(|e| RedoError::Io(format!("sync meta failed: {}", e)))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| RedoError::Io(format!("rename meta failed: {}", e)))?;
    debug!(target = "redo_writer", path = %path.display(), size = bytes.len(), "wrote meta file");
    Ok(())
}

/// Read and decode the meta file, returning `Ok(None)` when it does not
/// exist. A corrupt or truncated file surfaces as a codec error.
pub(crate) async fn read_meta_from_path(path: &Path) -> Result<Option<LogMeta>, RedoError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let meta = LogMeta::decode(&bytes)?;
            debug!(target = "redo_writer", path = %path.display(), size = bytes.len(), "read meta file");
            Ok(Some(meta))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RedoError::Io(format!("read meta failed: {}", e))),
    }
}
