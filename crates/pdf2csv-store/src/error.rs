//! Error types for the store crate

use pdf2csv_core::StatusParseError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("file metadata row not found: {0}")]
    NotFound(Uuid),

    #[error("blob storage error: {0}")]
    Storage(#[from] opendal::Error),

    #[error(transparent)]
    InvalidStatus(#[from] StatusParseError),

    #[error("invalid upload progress {0}; expected 0..=100")]
    InvalidProgress(u8),
}
