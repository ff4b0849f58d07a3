use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use rivulet_core::errors::RedoError;
use rivulet_core::storage::{FileWriter, RemoteStorage};

use crate::config::LogWriterConfig;
use crate::redo_metrics::{
    CLOUD_MIRROR_OBJECTS_TOTAL, REDO_FILE_GC_TOTAL, REDO_FILE_ROTATE_TOTAL,
    REDO_WRITE_BYTES_TOTAL,
};

pub(crate) const LOG_EXT: &str = ".log";
const PENDING_SUFFIX: &str = "pending.log.tmp";

// Frame header: [u32 len][u32 crc], crc32 over the payload
const FRAME_HEADER_SIZE: usize = 8;

/// The two logical streams multiplexed by one redo log writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Row,
    Ddl,
}

impl FileType {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            FileType::Row => "row",
            FileType::Ddl => "ddl",
        }
    }
}

/// File-backed append-only writer for one stream.
///
/// Records are framed `[u32 len][u32 crc][payload]` into a buffered active
/// file `{capture}_{changefeed}_{type}_{created}_pending.log.tmp`. Once the
/// active file passes the size threshold it is sealed: renamed to
/// `{capture}_{changefeed}_{type}_{created}_{seq}_{max_ts}.log` carrying a
/// rotation sequence and the timestamp watermark at seal time, and mirrored
/// to the remote store when one is configured. `gc` reclaims sealed files
/// whose embedded watermark is at or below the horizon; the active file is
/// never eligible.
#[derive(Debug)]
pub struct FileLogWriter {
    dir: PathBuf,
    change_feed_id: String,
    capture_id: String,
    file_type: FileType,
    created_at: i64,
    max_file_bytes: u64,
    storage: Option<Arc<dyn RemoteStorage>>,
    state: Mutex<FileState>,
    max_commit_ts: AtomicU64,
    running: AtomicBool,
}

#[derive(Debug)]
struct FileState {
    writer: Option<BufWriter<File>>,
    bytes_in_file: u64,
    file_seq: u64,
}

impl FileLogWriter {
    pub async fn open(
        cfg: &LogWriterConfig,
        file_type: FileType,
        storage: Option<Arc<dyn RemoteStorage>>,
    ) -> Result<Self, RedoError> {
        let writer = Self {
            dir: cfg.dir.clone(),
            change_feed_id: cfg.change_feed_id.clone(),
            capture_id: cfg.capture_id.clone(),
            file_type,
            created_at: cfg.create_time.timestamp(),
            max_file_bytes: cfg.max_log_size * 1024 * 1024,
            storage,
            state: Mutex::new(FileState {
                writer: None,
                bytes_in_file: 0,
                file_seq: 0,
            }),
            max_commit_ts: AtomicU64::new(0),
            running: AtomicBool::new(true),
        };
        {
            let mut state = writer.state.lock().await;
            writer.open_active(&mut state).await?;
        }
        info!(
            target = "redo_file",
            changefeed = %writer.change_feed_id,
            file_type = writer.file_type.as_str(),
            file = %writer.active_path().display(),
            "opened redo log file"
        );
        Ok(writer)
    }

    fn file_prefix(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.capture_id,
            self.change_feed_id,
            self.file_type.as_str(),
            self.created_at
        )
    }

    fn active_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}_{}", self.file_prefix(), PENDING_SUFFIX))
    }

    fn sealed_name(&self, seq: u64, max_ts: u64) -> String {
        format!("{}_{}_{}{}", self.file_prefix(), seq, max_ts, LOG_EXT)
    }

    /// Open (or re-open after a crash) the active file for appending.
    async fn open_active(&self, state: &mut FileState) -> Result<(), RedoError> {
        let path = self.active_path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| RedoError::Io(format!("open redo log file failed: {}", e)))?;
        let existing = file
            .metadata()
            .await
            .map_err(|e| RedoError::Io(format!("stat redo log file failed: {}", e)))?
            .len();
        state.writer = Some(BufWriter::new(file));
        state.bytes_in_file = existing;
        Ok(())
    }

    async fn rotate_if_needed(&self, state: &mut FileState) -> Result<(), RedoError> {
        if state.bytes_in_file < self.max_file_bytes {
            return Ok(());
        }
        self.seal_active(state).await?;
        self.open_active(state).await?;
        counter!(
            REDO_FILE_ROTATE_TOTAL.name,
            "changefeed" => self.change_feed_id.clone(),
            "type" => self.file_type.as_str()
        )
        .increment(1);
        Ok(())
    }

    /// Flush and seal the active file under its watermark name. An empty
    /// active file is removed instead of sealed. Mirroring a sealed file is
    /// best-effort; a failed upload is retried implicitly when the object is
    /// rewritten, never by blocking the write path.
    async fn seal_active(&self, state: &mut FileState) -> Result<(), RedoError> {
        let mut writer = match state.writer.take() {
            Some(w) => w,
            None => return Ok(()),
        };
        writer
            .flush()
            .await
            .map_err(|e| RedoError::FileWriter(format!("flush redo log file failed: {}", e)))?;
        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| RedoError::FileWriter(format!("sync redo log file failed: {}", e)))?;
        drop(writer);

        let active = self.active_path();
        if state.bytes_in_file == 0 {
            if let Err(e) = tokio::fs::remove_file(&active).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(target = "redo_file", file = %active.display(), error = %e, "remove empty redo log file failed");
                }
            }
            return Ok(());
        }

        state.file_seq += 1;
        let max_ts = self.max_commit_ts.load(Ordering::Acquire);
        let sealed_name = self.sealed_name(state.file_seq, max_ts);
        let sealed = self.dir.join(&sealed_name);
        tokio::fs::rename(&active, &sealed)
            .await
            .map_err(|e| RedoError::Io(format!("seal redo log file failed: {}", e)))?;
        debug!(
            target = "redo_file",
            changefeed = %self.change_feed_id,
            file_type = self.file_type.as_str(),
            file = %sealed.display(),
            max_ts,
            "sealed redo log file"
        );
        state.bytes_in_file = 0;

        if let Some(storage) = &self.storage {
            let result = match tokio::fs::read(&sealed).await {
                Ok(bytes) => storage.write_file(&sealed_name, &bytes).await,
                Err(e) => Err(RedoError::Io(format!(
                    "read sealed redo log file failed: {}",
                    e
                ))),
            };
            match result {
                Ok(()) => {
                    counter!(
                        CLOUD_MIRROR_OBJECTS_TOTAL.name,
                        "changefeed" => self.change_feed_id.clone(),
                        "result" => "ok"
                    )
                    .increment(1);
                }
                Err(e) => {
                    counter!(
                        CLOUD_MIRROR_OBJECTS_TOTAL.name,
                        "changefeed" => self.change_feed_id.clone(),
                        "result" => "error"
                    )
                    .increment(1);
                    warn!(
                        target = "redo_file",
                        changefeed = %self.change_feed_id,
                        file = %sealed_name,
                        error = %e,
                        "mirror sealed redo log file failed"
                    );
                }
            }
        }
        Ok(())
    }

    /// Parse the watermark out of a sealed file name belonging to this
    /// stream and type, ignoring everything else (including the active
    /// file). Matching skips the creation stamp so files sealed by an
    /// earlier incarnation stay GC-eligible.
    fn sealed_max_ts(&self, name: &str) -> Option<u64> {
        let type_prefix = format!(
            "{}_{}_{}_",
            self.capture_id,
            self.change_feed_id,
            self.file_type.as_str()
        );
        let rest = name.strip_prefix(&type_prefix)?;
        let rest = rest.strip_suffix(LOG_EXT)?;
        rest.rsplit('_').next()?.parse().ok()
    }
}

#[async_trait]
impl FileWriter for FileLogWriter {
    async fn write(&self, records: &[Vec<u8>]) -> Result<usize, RedoError> {
        if !self.is_running() {
            return Err(RedoError::WriterStopped);
        }
        let mut state = self.state.lock().await;
        self.rotate_if_needed(&mut state).await?;
        let writer = match state.writer.as_mut() {
            Some(w) => w,
            None => return Err(RedoError::WriterStopped),
        };

        let mut written = 0usize;
        for record in records {
            let len = record.len() as u32;
            let crc = crc32fast::hash(record);
            let res = async {
                writer.write_all(&len.to_le_bytes()).await?;
                writer.write_all(&crc.to_le_bytes()).await?;
                writer.write_all(record).await?;
                Ok::<(), std::io::Error>(())
            }
            .await;
            if let Err(e) = res {
                self.running.store(false, Ordering::Release);
                return Err(RedoError::FileWriter(format!(
                    "append redo frame failed: {}",
                    e
                )));
            }
            written += FRAME_HEADER_SIZE + record.len();
        }
        state.bytes_in_file += written as u64;
        counter!(
            REDO_WRITE_BYTES_TOTAL.name,
            "changefeed" => self.change_feed_id.clone(),
            "type" => self.file_type.as_str()
        )
        .increment(written as u64);
        Ok(written)
    }

    async fn flush(&self) -> Result<(), RedoError> {
        if !self.is_running() {
            return Err(RedoError::WriterStopped);
        }
        let mut state = self.state.lock().await;
        let writer = match state.writer.as_mut() {
            Some(w) => w,
            None => return Ok(()),
        };
        let res = async {
            writer.flush().await?;
            writer.get_ref().sync_all().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;
        res.map_err(|e| {
            self.running.store(false, Ordering::Release);
            RedoError::FileWriter(format!("flush redo log file failed: {}", e))
        })
    }

    fn advance_ts(&self, ts: u64) {
        self.max_commit_ts.fetch_max(ts, Ordering::AcqRel);
    }

    async fn gc(&self, ts: u64) -> Result<(), RedoError> {
        if !self.is_running() {
            return Err(RedoError::WriterStopped);
        }
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| RedoError::Io(format!("list redo dir failed: {}", e)))?;
        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|e| RedoError::Io(format!("list redo dir failed: {}", e)))?;
            let entry = match entry {
                Some(e) => e,
                None => break,
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let max_ts = match self.sealed_max_ts(&name) {
                Some(v) => v,
                None => continue,
            };
            if max_ts > ts {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    counter!(
                        REDO_FILE_GC_TOTAL.name,
                        "changefeed" => self.change_feed_id.clone(),
                        "type" => self.file_type.as_str()
                    )
                    .increment(1);
                    debug!(target = "redo_file", file = %name, max_ts, "gc removed sealed redo log file");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(target = "redo_file", file = %name, error = %e, "gc remove failed");
                    continue;
                }
            }
            if let Some(storage) = &self.storage {
                match storage.delete_file(&name).await {
                    Ok(()) => {}
                    Err(e) if e.is_remote_not_found() => {}
                    Err(e) => {
                        warn!(target = "redo_file", file = %name, error = %e, "gc remote delete failed");
                    }
                }
            }
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<(), RedoError> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        self.seal_active(&mut state).await?;
        debug!(
            target = "redo_file",
            changefeed = %self.change_feed_id,
            file_type = self.file_type.as_str(),
            "closed redo log file writer"
        );
        Ok(())
    }
}
