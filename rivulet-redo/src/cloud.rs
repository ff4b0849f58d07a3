use async_trait::async_trait;
use opendal::services::{Fs, Memory, S3};
use opendal::{ErrorKind, Operator};

use rivulet_core::errors::RedoError;
use rivulet_core::storage::RemoteStorage;

/// opendal-backed object store used to mirror meta and sealed log files.
///
/// The backend is picked from the URI-like root: `s3://bucket/prefix`,
/// `file:///abs/path` (or a bare absolute path) and `memory://ns` for tests.
#[derive(Debug, Clone)]
pub struct CloudStore {
    // Extra key prefix for backends that ignore the root (memory)
    root_prefix: String,
    op: Operator,
}

impl CloudStore {
    pub fn from_root(root: &str) -> Result<Self, RedoError> {
        if let Some(rest) = root.strip_prefix("s3://") {
            let (bucket, prefix) = split_bucket_prefix(rest)?;
            let mut builder = S3::default();
            builder = builder.bucket(&bucket);
            if !prefix.is_empty() {
                // S3 root must be an absolute path
                builder = builder.root(&format!("/{}", prefix));
            }
            let op = Operator::new(builder)
                .map_err(|e| RedoError::InvalidConfig(format!("opendal s3 builder: {}", e)))?
                .finish();
            Ok(Self {
                root_prefix: String::new(),
                op,
            })
        } else if let Some(rest) = root.strip_prefix("memory://") {
            let op = Operator::new(Memory::default())
                .map_err(|e| RedoError::InvalidConfig(format!("opendal memory builder: {}", e)))?
                .finish();
            Ok(Self {
                root_prefix: rest.trim_matches('/').to_string(),
                op,
            })
        } else if root.starts_with("file://") || root.starts_with('/') {
            let fs_root = root.strip_prefix("file://").unwrap_or(root);
            std::fs::create_dir_all(fs_root)
                .map_err(|e| RedoError::Io(format!("create cloud fs root failed: {}", e)))?;
            let builder = Fs::default().root(fs_root);
            let op = Operator::new(builder)
                .map_err(|e| RedoError::InvalidConfig(format!("opendal fs builder: {}", e)))?
                .finish();
            Ok(Self {
                root_prefix: String::new(),
                op,
            })
        } else {
            Err(RedoError::InvalidConfig(format!(
                "unsupported cloud root: {}",
                root
            )))
        }
    }

    fn join(&self, path: &str) -> String {
        let p = path.trim_matches('/');
        if self.root_prefix.is_empty() {
            p.to_string()
        } else {
            format!("{}/{}", self.root_prefix, p)
        }
    }

    fn list_root(&self) -> String {
        if self.root_prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.root_prefix)
        }
    }
}

#[async_trait]
impl RemoteStorage for CloudStore {
    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), RedoError> {
        let key = self.join(path);
        self.op
            .write(&key, data.to_vec())
            .await
            .map_err(|e| RedoError::Io(format!("cloud write {}: {}", key, e)))?;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), RedoError> {
        let key = self.join(path);
        self.op.delete(&key).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                RedoError::CloudNotFound(key.clone())
            } else {
                RedoError::Io(format!("cloud delete {}: {}", key, e))
            }
        })
    }

    async fn walk_dir(&self, prefix: &str) -> Result<Vec<String>, RedoError> {
        let root = self.list_root();
        let entries = self
            .op
            .list_with(&root)
            .recursive(true)
            .await
            .map_err(|e| RedoError::Io(format!("cloud list {}: {}", root, e)))?;
        let mut out = Vec::new();
        for entry in entries {
            if entry.metadata().mode().is_dir() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root.as_str())
                .unwrap_or(entry.path())
                .to_string();
            if rel.starts_with(prefix) {
                out.push(rel);
            }
        }
        Ok(out)
    }
}

fn split_bucket_prefix(rest: &str) -> Result<(String, String), RedoError> {
    let mut it = rest.splitn(2, '/');
    let bucket = it.next().unwrap_or("").to_string();
    if bucket.is_empty() {
        return Err(RedoError::InvalidConfig(format!(
            "invalid cloud root, missing bucket: s3://{}",
            rest
        )));
    }
    let prefix = it.next().unwrap_or("").trim_matches('/').to_string();
    Ok((bucket, prefix))
}
