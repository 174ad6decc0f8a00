//! Proxy error types.

use thiserror::Error;

/// Errors surfaced by the cache proxy.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The upstream fetch failed before a response was received.
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    /// The network lost the race against the response deadline.
    #[error("Network deadline exceeded after {ms} ms")]
    DeadlineExceeded { ms: u64 },

    /// A request or manifest URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Pre-populating a version's static set did not complete.
    #[error("Install of version {version} failed: {reason}")]
    InstallFailed { version: u32, reason: String },
}

pub type ProxyResult<T> = Result<T, ProxyError>;
