//! Upstream fetcher.
//!
//! The proxy talks to the network through this trait so the strategies
//! can be driven in tests by a scripted double. Box-pinned futures keep
//! the trait object-safe.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::debug;

use crate::error::{ProxyError, ProxyResult};
use crate::request::{CachedResponse, ProxyRequest};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One upstream round-trip.
///
/// A settled non-2xx response is still `Ok`: the server answered. `Err`
/// means the request never produced a response (connect failure, broken
/// transfer, client-side limit).
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: ProxyRequest) -> BoxFuture<'_, ProxyResult<CachedResponse>>;
}

/// Arc wrapper for Fetcher trait objects.
pub type DynFetcher = Arc<dyn Fetcher>;

/// Upper bound on one upstream round-trip. Deliberately larger than the
/// strategies' response deadline so a slow fetch can still finish in the
/// background and populate the cache.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(15);

/// Real fetcher backed by reqwest.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> ProxyResult<Self> {
        let client = Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .map_err(|e| ProxyError::Upstream(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, request: ProxyRequest) -> BoxFuture<'_, ProxyResult<CachedResponse>> {
        Box::pin(async move {
            let response = self
                .client
                .request(request.method.clone(), request.url.clone())
                .send()
                .await
                .map_err(|e| ProxyError::Upstream(format!("HTTP request failed: {e}")))?;

            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(String::from);
            let body = response
                .bytes()
                .await
                .map_err(|e| ProxyError::Upstream(format!("Failed to read body: {e}")))?
                .to_vec();

            debug!(url = %request.url, status, bytes = body.len(), "Fetched upstream");
            Ok(CachedResponse::new(status, content_type, body))
        })
    }
}

enum ScriptedFetch {
    Respond(CachedResponse),
    RespondAfter(Duration, CachedResponse),
    Fail(String),
    Hang,
}

/// Scripted fetcher for tests.
///
/// Outcomes are queued per exact URL and consumed in order; a URL with no
/// remaining script fails loudly so tests never pass on an accidental
/// fetch.
#[derive(Default)]
pub struct MockFetcher {
    script: parking_lot::Mutex<HashMap<String, VecDeque<ScriptedFetch>>>,
    calls: parking_lot::Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `url`.
    pub fn respond(&self, url: &str, response: CachedResponse) {
        self.push(url, ScriptedFetch::Respond(response));
    }

    /// Queue a 200 text response for `url`.
    pub fn respond_ok(&self, url: &str, content_type: &str, body: &str) {
        self.respond(url, CachedResponse::text(200, content_type, body));
    }

    /// Queue a response that settles only after `delay`.
    pub fn respond_after(&self, url: &str, delay: Duration, response: CachedResponse) {
        self.push(url, ScriptedFetch::RespondAfter(delay, response));
    }

    /// Queue a transport failure for `url`.
    pub fn fail(&self, url: &str, message: &str) {
        self.push(url, ScriptedFetch::Fail(message.to_string()));
    }

    /// Queue a fetch that never settles.
    pub fn hang(&self, url: &str) {
        self.push(url, ScriptedFetch::Hang);
    }

    /// Every fetched URL, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// How many fetched URLs contain `pattern`.
    pub fn call_count(&self, pattern: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|url| url.contains(pattern))
            .count()
    }

    fn push(&self, url: &str, outcome: ScriptedFetch) {
        self.script
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(outcome);
    }

    fn next(&self, url: &str) -> Option<ScriptedFetch> {
        self.calls.lock().push(url.to_string());
        self.script.lock().get_mut(url)?.pop_front()
    }
}

impl Fetcher for MockFetcher {
    fn fetch(&self, request: ProxyRequest) -> BoxFuture<'_, ProxyResult<CachedResponse>> {
        let outcome = self.next(request.url.as_str());
        Box::pin(async move {
            match outcome {
                Some(ScriptedFetch::Respond(response)) => Ok(response),
                Some(ScriptedFetch::RespondAfter(delay, response)) => {
                    tokio::time::sleep(delay).await;
                    Ok(response)
                }
                Some(ScriptedFetch::Fail(message)) => Err(ProxyError::Upstream(message)),
                Some(ScriptedFetch::Hang) => std::future::pending().await,
                None => Err(ProxyError::Upstream(format!(
                    "no scripted response for {}",
                    request.url
                ))),
            }
        })
    }
}
