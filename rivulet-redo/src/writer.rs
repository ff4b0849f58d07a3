use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rivulet_core::errors::RedoError;
use rivulet_core::events::{RedoDdlEvent, RedoRowEvent};
use rivulet_core::storage::{FileWriter, RemoteStorage};

use crate::cloud::CloudStore;
use crate::config::LogWriterConfig;
use crate::file::{FileLogWriter, FileType};
use crate::meta::{self, LogMeta};
use crate::redo_metrics::{REDO_FLUSH_ERRORS_TOTAL, REDO_WRITE_ROWS_TOTAL};
use crate::registry;

/// Stateful writer multiplexing one stream's row and DDL events onto two
/// append-only file writers, while owning the authoritative watermark record
/// (`LogMeta`) and its local + remote persistence.
///
/// Instances are shared as `Arc<LogWriter>`; the process-wide registry hands
/// out the same instance for repeated opens of the same stream and
/// directory. Two background tasks (periodic flush, periodic GC) run until
/// `close` cancels the shared shutdown token.
#[derive(Debug)]
pub struct LogWriter {
    cfg: LogWriterConfig,
    row_writer: Arc<dyn FileWriter>,
    ddl_writer: Arc<dyn FileWriter>,
    // Watermarks; held briefly, never across I/O
    meta: tokio::sync::Mutex<LogMeta>,
    // Serializes meta persistence I/O so record writes proceed during a flush
    meta_flush: tokio::sync::Mutex<()>,
    storage: Option<Arc<dyn RemoteStorage>>,
    shutdown: CancellationToken,
}

impl LogWriter {
    /// Open the file writers, seed the watermarks from a prior meta file if
    /// one exists, persist the initial record and start the background
    /// loops. Callers go through `new_log_writer`, which layers the
    /// registry cache on top.
    pub(crate) async fn open(cfg: LogWriterConfig) -> Result<Arc<Self>, RedoError> {
        let cfg = cfg.normalized();
        tokio::fs::create_dir_all(&cfg.dir)
            .await
            .map_err(|e| RedoError::Io(format!("create redo dir failed: {}", e)))?;

        let storage: Option<Arc<dyn RemoteStorage>> = if cfg.cloud_storage {
            Some(Arc::new(CloudStore::from_root(&cfg.cloud_root)?))
        } else {
            None
        };
        let row_writer: Arc<dyn FileWriter> =
            Arc::new(FileLogWriter::open(&cfg, FileType::Row, storage.clone()).await?);
        let ddl_writer: Arc<dyn FileWriter> =
            Arc::new(FileLogWriter::open(&cfg, FileType::Ddl, storage.clone()).await?);

        let meta_path = cfg
            .dir
            .join(meta::meta_file_name(&cfg.capture_id, &cfg.change_feed_id));
        let log_meta = meta::read_meta_from_path(&meta_path).await?.unwrap_or_default();
        info!(
            target = "redo_writer",
            changefeed = %cfg.change_feed_id,
            dir = %cfg.dir.display(),
            checkpoint_ts = log_meta.checkpoint_ts,
            resolved_ts = log_meta.resolved_ts,
            cloud = cfg.cloud_storage,
            "opened redo log writer"
        );

        let writer = Arc::new(Self {
            cfg,
            row_writer,
            ddl_writer,
            meta: tokio::sync::Mutex::new(log_meta),
            meta_flush: tokio::sync::Mutex::new(()),
            storage,
            shutdown: CancellationToken::new(),
        });
        writer.flush_meta().await?;
        Arc::clone(&writer).start_background();
        Ok(writer)
    }

    pub fn config(&self) -> &LogWriterConfig {
        &self.cfg
    }

    /// Snapshot of the current watermark record.
    pub async fn meta(&self) -> LogMeta {
        self.meta.lock().await.clone()
    }

    /// The writer is stopped once either child file writer stops running,
    /// whether through `close` or a fatal error inside the writer.
    pub fn is_stopped(&self) -> bool {
        !self.row_writer.is_running() || !self.ddl_writer.is_running()
    }

    fn check_cancelled(ctx: &CancellationToken) -> Result<(), RedoError> {
        if ctx.is_cancelled() {
            return Err(RedoError::Cancelled);
        }
        Ok(())
    }

    fn check_running(&self) -> Result<(), RedoError> {
        if self.is_stopped() {
            return Err(RedoError::WriterStopped);
        }
        Ok(())
    }

    /// Append the given row events to the row stream. Envelopes without a
    /// row carry no payload and are dropped; when nothing remains the file
    /// writer is not touched and `Ok(0)` is returned. On success the row
    /// writer's timestamp watermark advances to the batch's maximum commit
    /// timestamp, which is also returned.
    pub async fn write_log(
        &self,
        ctx: &CancellationToken,
        table_id: i64,
        rows: &[RedoRowEvent],
    ) -> Result<u64, RedoError> {
        Self::check_cancelled(ctx)?;
        self.check_running()?;

        let mut encoded = Vec::with_capacity(rows.len());
        let mut max_ts = 0u64;
        for event in rows {
            let row = match &event.row {
                Some(r) => r,
                None => continue,
            };
            max_ts = max_ts.max(row.commit_ts);
            let bytes = bincode::serialize(event)
                .map_err(|e| RedoError::Codec(format!("row event serialize failed: {}", e)))?;
            encoded.push(bytes);
        }
        if encoded.is_empty() {
            return Ok(0);
        }

        self.row_writer.write(&encoded).await?;
        self.row_writer.advance_ts(max_ts);
        counter!(
            REDO_WRITE_ROWS_TOTAL.name,
            "changefeed" => self.cfg.change_feed_id.clone(),
            "table" => table_id.to_string()
        )
        .increment(encoded.len() as u64);
        Ok(max_ts)
    }

    /// Append one DDL event to the DDL stream. A missing envelope or inner
    /// event is a no-op.
    pub async fn send_ddl(
        &self,
        ctx: &CancellationToken,
        ddl: Option<&RedoDdlEvent>,
    ) -> Result<(), RedoError> {
        Self::check_cancelled(ctx)?;
        self.check_running()?;

        let (event, commit_ts) = match ddl {
            Some(e) => match &e.ddl {
                Some(inner) => (e, inner.commit_ts),
                None => return Ok(()),
            },
            None => return Ok(()),
        };
        let bytes = bincode::serialize(event)
            .map_err(|e| RedoError::Codec(format!("ddl event serialize failed: {}", e)))?;
        self.ddl_writer.write(&[bytes]).await?;
        self.ddl_writer.advance_ts(commit_ts);
        Ok(())
    }

    /// Flush both file writers, then record and persist the per-table
    /// resolved timestamp. A flush failure on either side surfaces (tagged,
    /// both preserved) before the watermark is touched; a persistence
    /// failure surfaces but the in-memory update is retained.
    pub async fn flush_log(
        &self,
        ctx: &CancellationToken,
        table_id: i64,
        ts: u64,
    ) -> Result<(), RedoError> {
        Self::check_cancelled(ctx)?;
        self.check_running()?;

        self.flush_writers().await?;
        {
            let mut log_meta = self.meta.lock().await;
            log_meta.resolved_ts_list.insert(table_id, ts);
        }
        self.flush_meta().await
    }

    /// Record and persist the global checkpoint timestamp. Does not flush
    /// the file writers.
    pub async fn emit_checkpoint_ts(
        &self,
        ctx: &CancellationToken,
        ts: u64,
    ) -> Result<(), RedoError> {
        Self::check_cancelled(ctx)?;
        self.check_running()?;

        {
            let mut log_meta = self.meta.lock().await;
            log_meta.checkpoint_ts = ts;
        }
        self.flush_meta().await
    }

    /// Record and persist the global resolved timestamp. Does not flush the
    /// file writers.
    pub async fn emit_resolved_ts(
        &self,
        ctx: &CancellationToken,
        ts: u64,
    ) -> Result<(), RedoError> {
        Self::check_cancelled(ctx)?;
        self.check_running()?;

        {
            let mut log_meta = self.meta.lock().await;
            log_meta.resolved_ts = ts;
        }
        self.flush_meta().await
    }

    /// Project the per-table resolved timestamps onto the requested table
    /// ids. Tables without an entry, or with a zero entry, are omitted.
    pub async fn get_current_resolved_ts(
        &self,
        ctx: &CancellationToken,
        table_ids: &[i64],
    ) -> Result<BTreeMap<i64, u64>, RedoError> {
        Self::check_cancelled(ctx)?;

        let log_meta = self.meta.lock().await;
        let mut out = BTreeMap::new();
        for id in table_ids {
            if let Some(ts) = log_meta.resolved_ts_list.get(id) {
                if *ts > 0 {
                    out.insert(*id, *ts);
                }
            }
        }
        Ok(out)
    }

    /// Stop the background loops and close both file writers, always both,
    /// combining their errors. Idempotent; afterwards `is_stopped` is true
    /// and every record/timestamp operation fails with `WriterStopped`.
    pub async fn close(&self) -> Result<(), RedoError> {
        self.shutdown.cancel();
        let row_err = self
            .row_writer
            .close()
            .await
            .err()
            .map(|e| RedoError::RowWriter(Box::new(e)));
        let ddl_err = self
            .ddl_writer
            .close()
            .await
            .err()
            .map(|e| RedoError::DdlWriter(Box::new(e)));
        match RedoError::combine(row_err, ddl_err) {
            Some(e) => Err(e),
            None => {
                debug!(target = "redo_writer", changefeed = %self.cfg.change_feed_id, "closed redo log writer");
                Ok(())
            }
        }
    }

    /// Close the writer, then remove every local artifact (and the remote
    /// ones when mirroring is on) and drop the instance from the registry.
    /// Close-before-delete keeps in-flight writes from racing the unlink
    /// and releases file handles before the directory is removed.
    pub async fn delete_all_logs(&self, ctx: &CancellationToken) -> Result<(), RedoError> {
        Self::check_cancelled(ctx)?;
        self.close().await?;

        self.remove_local_files().await?;
        if self.cfg.cloud_storage {
            self.remove_remote_files().await?;
        } else {
            match tokio::fs::remove_dir_all(&self.cfg.dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(RedoError::Io(format!("remove redo dir failed: {}", e))),
            }
        }

        registry::remove(&self.cfg.change_feed_id).await;
        info!(
            target = "redo_writer",
            changefeed = %self.cfg.change_feed_id,
            dir = %self.cfg.dir.display(),
            "deleted all redo logs"
        );
        Ok(())
    }

    async fn remove_local_files(&self) -> Result<(), RedoError> {
        let mut entries = match tokio::fs::read_dir(&self.cfg.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(RedoError::Io(format!("list redo dir failed: {}", e))),
        };
        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|e| RedoError::Io(format!("list redo dir failed: {}", e)))?;
            let entry = match entry {
                Some(e) => e,
                None => break,
            };
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(RedoError::Io(format!(
                        "remove redo file {} failed: {}",
                        entry.path().display(),
                        e
                    )))
                }
            }
        }
        Ok(())
    }

    /// Remote deletion tolerates "no such key" per file; every other remote
    /// error is fatal and wrapped for identification.
    async fn remove_remote_files(&self) -> Result<(), RedoError> {
        let storage = match &self.storage {
            Some(s) => s,
            None => return Ok(()),
        };
        let prefix = format!("{}_{}_", self.cfg.capture_id, self.cfg.change_feed_id);
        let files = storage
            .walk_dir(&prefix)
            .await
            .map_err(|e| RedoError::CloudApi(Box::new(e)))?;
        for file in files {
            match storage.delete_file(&file).await {
                Ok(()) => {}
                Err(e) if e.is_remote_not_found() => {
                    debug!(target = "redo_writer", file = %file, "remote object already gone");
                }
                Err(e) => return Err(RedoError::CloudApi(Box::new(e))),
            }
        }
        Ok(())
    }

    async fn flush_writers(&self) -> Result<(), RedoError> {
        let row_err = self
            .row_writer
            .flush()
            .await
            .err()
            .map(|e| RedoError::RowWriter(Box::new(e)));
        let ddl_err = self
            .ddl_writer
            .flush()
            .await
            .err()
            .map(|e| RedoError::DdlWriter(Box::new(e)));
        match RedoError::combine(row_err, ddl_err) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Persist the watermark record: encoded snapshot under the meta lock,
    /// then tmp+rename locally and a mirror write remotely under the
    /// persistence lock. Both writes are attempted; their errors combine.
    async fn flush_meta(&self) -> Result<(), RedoError> {
        let bytes = {
            let log_meta = self.meta.lock().await;
            log_meta.encode()?
        };
        let _guard = self.meta_flush.lock().await;
        let file_name = meta::meta_file_name(&self.cfg.capture_id, &self.cfg.change_feed_id);
        let local_err = meta::write_meta_to_path(&self.cfg.dir.join(&file_name), &bytes)
            .await
            .err();
        let remote_err = match &self.storage {
            Some(storage) => storage.write_file(&file_name, &bytes).await.err(),
            None => None,
        };
        match RedoError::combine(local_err, remote_err) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub(crate) fn start_background(self: Arc<Self>) {
        let flush = Arc::clone(&self);
        tokio::spawn(async move { flush.run_flush().await });
        tokio::spawn(async move { self.run_gc().await });
    }

    async fn run_flush(&self) {
        let mut ticker = interval(Duration::from_millis(self.cfg.flush_interval_ms));
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if self.is_stopped() {
                        break;
                    }
                    if let Err(e) = self.flush_writers().await {
                        counter!(
                            REDO_FLUSH_ERRORS_TOTAL.name,
                            "changefeed" => self.cfg.change_feed_id.clone()
                        )
                        .increment(1);
                        warn!(
                            target = "redo_writer",
                            changefeed = %self.cfg.change_feed_id,
                            error = %e,
                            "background flush failed"
                        );
                    }
                }
            }
        }
        debug!(target = "redo_writer", changefeed = %self.cfg.change_feed_id, "flush loop stopped");
    }

    async fn run_gc(&self) {
        let mut ticker = interval(Duration::from_millis(self.cfg.gc_interval_ms));
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if self.is_stopped() {
                        break;
                    }
                    let gc_ts = self.gc_ts().await;
                    let row_err = self
                        .row_writer
                        .gc(gc_ts)
                        .await
                        .err()
                        .map(|e| RedoError::RowWriter(Box::new(e)));
                    let ddl_err = self
                        .ddl_writer
                        .gc(gc_ts)
                        .await
                        .err()
                        .map(|e| RedoError::DdlWriter(Box::new(e)));
                    if let Some(e) = RedoError::combine(row_err, ddl_err) {
                        warn!(
                            target = "redo_writer",
                            changefeed = %self.cfg.change_feed_id,
                            gc_ts,
                            error = %e,
                            "background gc failed"
                        );
                    }
                }
            }
        }
        debug!(target = "redo_writer", changefeed = %self.cfg.change_feed_id, "gc loop stopped");
    }

    /// Safe GC horizon: nothing newer than the checkpoint or any table's
    /// resolved timestamp may be reclaimed.
    async fn gc_ts(&self) -> u64 {
        let log_meta = self.meta.lock().await;
        log_meta
            .resolved_ts_list
            .values()
            .copied()
            .min()
            .map_or(log_meta.checkpoint_ts, |m| m.min(log_meta.checkpoint_ts))
    }

    #[cfg(test)]
    pub(crate) fn with_writers(
        cfg: LogWriterConfig,
        row_writer: Arc<dyn FileWriter>,
        ddl_writer: Arc<dyn FileWriter>,
        storage: Option<Arc<dyn RemoteStorage>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg: cfg.normalized(),
            row_writer,
            ddl_writer,
            meta: tokio::sync::Mutex::new(LogMeta::default()),
            meta_flush: tokio::sync::Mutex::new(()),
            storage,
            shutdown: CancellationToken::new(),
        })
    }
}
