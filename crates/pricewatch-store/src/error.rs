//! Store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt record in {collection}: {detail}")]
    Corrupt { collection: String, detail: String },
}

pub type StoreResult<T> = Result<T, StoreError>;
