use thiserror::Error;

#[derive(Debug, Error)]
pub enum LwwError {
    #[error(transparent)]
    Patch(#[from] patches_core::PatchError),
    #[error(transparent)]
    Storage(#[from] patches_storage::StorageError),
}

pub type Result<T> = std::result::Result<T, LwwError>;
