//! Request and response model.
//!
//! The proxy sits between callers and the network, so it needs its own
//! notion of a request (method + absolute URL) and of a response that can
//! live in a cache set. `ProxyResponse` additionally carries where the
//! bytes came from, which callers use to distinguish fresh data from an
//! offline fallback.

use chrono::{DateTime, Utc};
use reqwest::Method;
use url::Url;

use crate::error::ProxyResult;

/// One intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub method: Method,
    pub url: Url,
}

impl ProxyRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url }
    }

    /// Convenience constructor for the common case.
    pub fn get(url: &str) -> ProxyResult<Self> {
        Ok(Self::new(Method::GET, Url::parse(url)?))
    }

    /// Cache key: the exact URL including query string.
    pub fn cache_key(&self) -> String {
        self.url.as_str().to_string()
    }
}

/// A response in cacheable form: status, content type and body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn new(status: u16, content_type: Option<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type,
            body,
            stored_at: Utc::now(),
        }
    }

    /// Text response helper, mostly for fixtures and synthesized pages.
    pub fn text(status: u16, content_type: &str, body: &str) -> Self {
        Self::new(
            status,
            Some(content_type.to_string()),
            body.as_bytes().to_vec(),
        )
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Where a proxied response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Fresh bytes from the upstream.
    Network,
    /// Served from a cache set.
    Cache,
    /// The dedicated offline page.
    OfflinePage,
    /// Built by the proxy itself because nothing else was available.
    Synthesized,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Cache => "cache",
            Self::OfflinePage => "offline_page",
            Self::Synthesized => "synthesized",
        }
    }
}

/// What the proxy hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

impl ProxyResponse {
    pub fn from_network(response: CachedResponse) -> Self {
        Self::with_source(response, ResponseSource::Network)
    }

    pub fn from_cache(response: CachedResponse) -> Self {
        Self::with_source(response, ResponseSource::Cache)
    }

    pub fn offline_page(response: CachedResponse) -> Self {
        Self::with_source(response, ResponseSource::OfflinePage)
    }

    /// Minimal last-resort page for navigations with nothing cached.
    pub fn unavailable() -> Self {
        Self {
            status: 503,
            content_type: Some("text/html".to_string()),
            body: b"<h1>Offline</h1><p>This page is unavailable right now.</p>".to_vec(),
            source: ResponseSource::Synthesized,
        }
    }

    fn with_source(response: CachedResponse, source: ResponseSource) -> Self {
        Self {
            status: response.status,
            content_type: response.content_type,
            body: response.body,
            source,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, with invalid UTF-8 replaced.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
