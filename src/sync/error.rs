use thiserror::Error;

use crate::sync::backend::StoreError;

pub type Result<T> = core::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Backend store error: {0}")]
    Store(#[from] StoreError),

    #[error("Realtime channel error: {0}")]
    Realtime(String),

    #[error("Row validation error: {0}")]
    RowValidation(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}
