//! Sync error types.

use thiserror::Error;

/// Errors from queue and drain operations.
///
/// Replay failures against the API are not errors at this level; they
/// leave the mutation queued and show up in the drain report instead.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] pricewatch_store::StoreError),
}

pub type SyncResult<T> = Result<T, SyncError>;
