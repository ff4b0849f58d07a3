use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use rivulet_core::errors::RedoError;

use crate::config::LogWriterConfig;
use crate::writer::LogWriter;

// Process-wide instance cache, keyed by change feed id. One mutex serializes
// every lookup and mutation; it is touched only here and on bulk deletion.
static LOG_WRITERS: Mutex<BTreeMap<String, Arc<LogWriter>>> = Mutex::const_new(BTreeMap::new());

/// Return the live writer for `cfg.change_feed_id`, constructing one when
/// none is cached for the same directory.
///
/// A cache hit requires the cached instance's `dir` to equal `cfg.dir`;
/// downstream code relies on identity equality under same-config reuse. A
/// same-id call with a different `dir` constructs a fresh instance and
/// replaces the cache entry; the previous instance keeps running and remains
/// the caller's to close.
pub async fn new_log_writer(
    ctx: &CancellationToken,
    cfg: LogWriterConfig,
) -> Result<Arc<LogWriter>, RedoError> {
    if ctx.is_cancelled() {
        return Err(RedoError::Cancelled);
    }
    cfg.validate()?;

    let mut writers = LOG_WRITERS.lock().await;
    if let Some(existing) = writers.get(&cfg.change_feed_id) {
        if existing.config().dir == cfg.dir {
            debug!(
                target = "redo_writer",
                changefeed = %cfg.change_feed_id,
                "reusing cached redo log writer"
            );
            return Ok(Arc::clone(existing));
        }
    }
    let writer = LogWriter::open(cfg).await?;
    writers.insert(
        writer.config().change_feed_id.clone(),
        Arc::clone(&writer),
    );
    Ok(writer)
}

pub(crate) async fn remove(change_feed_id: &str) {
    LOG_WRITERS.lock().await.remove(change_feed_id);
}

#[cfg(test)]
pub(crate) async fn insert(writer: Arc<LogWriter>) {
    LOG_WRITERS
        .lock()
        .await
        .insert(writer.config().change_feed_id.clone(), writer);
}

#[cfg(test)]
pub(crate) async fn contains(change_feed_id: &str) -> bool {
    LOG_WRITERS.lock().await.contains_key(change_feed_id)
}

// Tests isolate streams by unique ids; full wipes are rarely needed.
#[cfg(test)]
#[allow(dead_code)]
pub(crate) async fn clear() {
    LOG_WRITERS.lock().await.clear();
}
