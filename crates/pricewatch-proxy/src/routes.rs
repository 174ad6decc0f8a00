//! Route classification.
//!
//! Every intercepted request is assigned exactly one route class, and the
//! class alone decides the caching strategy. Classification looks only at
//! the method and URL, so it is cheap and deterministic.

use std::collections::HashSet;

use reqwest::Method;

use crate::request::ProxyRequest;

/// Caching strategy selector for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Install-time manifest entry: cache-first against the static set.
    StaticAsset,
    /// GET with a file extension: stale-while-revalidate.
    Media,
    /// GET under `/api/`: network-first with a bounded deadline.
    ApiGet,
    /// Extensionless GET: network-first with the offline fallback chain.
    Navigation,
    /// Never intercepted; passed through untouched.
    Bypass,
}

impl RouteClass {
    /// Classify a request against the static-asset manifest.
    ///
    /// Non-GET methods and non-http(s) schemes always bypass the cache.
    pub fn classify(request: &ProxyRequest, static_manifest: &HashSet<String>) -> Self {
        if request.method != Method::GET {
            return Self::Bypass;
        }
        if !matches!(request.url.scheme(), "http" | "https") {
            return Self::Bypass;
        }

        let path = request.url.path();
        if static_manifest.contains(path) {
            return Self::StaticAsset;
        }
        if path.starts_with("/api/") {
            return Self::ApiGet;
        }
        if has_extension(path) {
            return Self::Media;
        }
        Self::Navigation
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StaticAsset => "static",
            Self::Media => "media",
            Self::ApiGet => "api",
            Self::Navigation => "navigation",
            Self::Bypass => "bypass",
        }
    }
}

/// True when the final path segment looks like a file name.
fn has_extension(path: &str) -> bool {
    let segment = path.rsplit('/').next().unwrap_or_default();
    match segment.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && !ext.is_empty(),
        None => false,
    }
}
