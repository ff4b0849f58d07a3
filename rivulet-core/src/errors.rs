use std::fmt::{self, Display, Formatter};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedoError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("redo writer stopped")]
    WriterStopped,
    #[error("invalid log writer config: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("file writer error: {0}")]
    FileWriter(String),
    #[error("row writer: {0}")]
    RowWriter(Box<RedoError>),
    #[error("ddl writer: {0}")]
    DdlWriter(Box<RedoError>),
    #[error("cloud storage api error: {0}")]
    CloudApi(Box<RedoError>),
    #[error("cloud object not found: {0}")]
    CloudNotFound(String),
    #[error("{0}")]
    Multiple(MultiError),
}

impl RedoError {
    /// Merge two optional errors, keeping both when both are present.
    /// Nested `Multiple`s are flattened so every member error stays reachable.
    pub fn combine(a: Option<RedoError>, b: Option<RedoError>) -> Option<RedoError> {
        match (a, b) {
            (None, None) => None,
            (Some(e), None) | (None, Some(e)) => Some(e),
            (Some(a), Some(b)) => {
                let mut members = Vec::with_capacity(2);
                for e in [a, b] {
                    match e {
                        RedoError::Multiple(m) => members.extend(m.0),
                        other => members.push(other),
                    }
                }
                Some(RedoError::Multiple(MultiError(members)))
            }
        }
    }

    /// True for the remote store's "no such key" condition, which deletion
    /// paths treat as success.
    pub fn is_remote_not_found(&self) -> bool {
        matches!(self, RedoError::CloudNotFound(_))
    }
}

/// A flat collection of errors produced by `RedoError::combine` when more
/// than one operation failed in the same call.
#[derive(Debug)]
pub struct MultiError(Vec<RedoError>);

impl MultiError {
    pub fn errors(&self) -> &[RedoError] {
        &self.0
    }
}

impl Display for MultiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors: [", self.0.len())?;
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", e)?;
        }
        write!(f, "]")
    }
}
