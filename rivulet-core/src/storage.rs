use async_trait::async_trait;

use crate::errors::RedoError;

/// Append-only writer for one logical redo stream. Implementations own block
/// encoding, rotation and fsync policy; callers only see the operations below.
///
/// Implementations must be individually thread-safe. Errors from `write` and
/// `flush` are fatal to that operation only; the caller decides whether to
/// retry with fresh records.
#[async_trait]
pub trait FileWriter: Send + Sync + std::fmt::Debug + 'static {
    /// Append the encoded records atomically, in order. May buffer.
    /// Returns the number of bytes accepted.
    async fn write(&self, records: &[Vec<u8>]) -> Result<usize, RedoError>;

    /// Make all previously written bytes durable.
    async fn flush(&self) -> Result<(), RedoError>;

    /// Inform the writer of a new maximum commit timestamp among buffered
    /// records.
    fn advance_ts(&self, ts: u64);

    /// May delete files whose maximum timestamp is `<= ts`.
    async fn gc(&self, ts: u64) -> Result<(), RedoError>;

    /// False once `close` has been called or after a fatal internal error.
    fn is_running(&self) -> bool;

    /// Idempotent; flushes and releases resources.
    async fn close(&self) -> Result<(), RedoError>;
}

/// Minimal object-store capability set consumed by the redo writer for
/// mirroring and bulk deletion. Errors are opaque to callers except for the
/// "no such key" condition exposed via `RedoError::is_remote_not_found`.
#[async_trait]
pub trait RemoteStorage: Send + Sync + std::fmt::Debug + 'static {
    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), RedoError>;

    async fn delete_file(&self, path: &str) -> Result<(), RedoError>;

    /// List every object key under the given prefix.
    async fn walk_dir(&self, prefix: &str) -> Result<Vec<String>, RedoError>;
}
