use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("document {0} not found")]
    DocNotFound(String),
    #[error("version {0} not found")]
    VersionNotFound(String),
    #[error("branch {0} not found")]
    BranchNotFound(String),
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
