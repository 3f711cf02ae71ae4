//! Error taxonomy for the vault core
//!
//! Every core operation returns one of these kinds; callers translate them
//! into their own status representation. Expected business outcomes (e.g. a
//! staged source that is already missing) are modeled as data, not errors.

use thiserror::Error;

/// Core error kinds, never conflated
#[derive(Debug, Error)]
pub enum VaultError {
    /// Logical path unresolved, or a row (asset/group/pending) is not present
    #[error("not found: {0}")]
    NotFound(String),

    /// State-machine violation (approve on a deleted row, stage on a staged asset)
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Uniqueness or advisory-lock contention
    #[error("conflict: {0}")]
    Conflict(String),

    /// Inspection subprocess failed, timed out, or produced unparseable output
    #[error("probe failed for '{path}': {message}")]
    ProbeFailed { path: String, message: String },

    /// Filesystem read/write/move failure
    #[error("io error at '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Catalog unreachable, or the enrichment callback exhausted its retries
    #[error("dependency failed: {0}")]
    Dependency(String),

    /// Cooperative cancel observed
    #[error("operation cancelled")]
    Cancelled,
}

impl VaultError {
    /// Attach a path to an I/O error
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn probe(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProbeFailed {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for VaultError {
    fn from(err: anyhow::Error) -> Self {
        Self::Dependency(format!("database error: {}", err))
    }
}

impl From<sqlx::Error> for VaultError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            other => Self::Dependency(format!("database error: {}", other)),
        }
    }
}

pub type VaultResult<T> = Result<T, VaultError>;
