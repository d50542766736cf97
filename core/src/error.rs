use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("index is unavailable")]
    Unavailable,
    #[error("index at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("an index already exists at {0}")]
    AlreadyExists(PathBuf),
    #[error("index write failed: {0}")]
    Write(String),
    #[error("index read failed: {0}")]
    Read(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is unavailable: {0}")]
    Unavailable(String),
    #[error("store write failed: {0}")]
    Write(String),
    #[error("store read failed: {0}")]
    Read(String),
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    /// The normalizer answered, but with something that is not a token list.
    #[error("normalizer returned malformed output: {0}")]
    Malformed(String),
    #[error("normalizer is unavailable: {0}")]
    Unavailable(String),
}

pub type IndexResult<T> = std::result::Result<T, IndexError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;
