//! Stream client error types.

use thiserror::Error;

/// Errors from the streaming price client.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code:?}, reason={reason}")]
    ConnectionClosed { code: Option<u16>, reason: String },

    #[error("Heartbeat timeout: no pong within {timeout_ms}ms")]
    HeartbeatTimeout { timeout_ms: u64 },

    #[error("Gave up after {attempts} reconnect attempts; call connect() to retry")]
    ReconnectsExhausted { attempts: u32 },

    #[error("WebSocket error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;
