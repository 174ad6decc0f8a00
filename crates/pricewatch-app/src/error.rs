//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] pricewatch_store::StoreError),

    #[error("Stream error: {0}")]
    Stream(#[from] pricewatch_stream::StreamError),

    #[error("Sync error: {0}")]
    Sync(#[from] pricewatch_sync::SyncError),

    #[error("API error: {0}")]
    Api(#[from] pricewatch_sync::ApiError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] pricewatch_proxy::ProxyError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] pricewatch_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Whether this failure was a server-side rejection of the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Api(pricewatch_sync::ApiError::Rejected { .. }))
    }
}
