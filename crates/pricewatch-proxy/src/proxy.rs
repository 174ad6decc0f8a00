//! Cache proxy strategies and version lifecycle.
//!
//! `handle()` classifies each request and answers it with the strategy
//! for its route class. The proxy outlives any single caller: background
//! refreshes and late network responses complete on their own and only
//! ever populate the cache, never a response that was already returned.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use pricewatch_telemetry::Metrics;

use crate::cache::{CacheSet, CacheStorage};
use crate::error::{ProxyError, ProxyResult};
use crate::fetch::DynFetcher;
use crate::request::{CachedResponse, ProxyRequest, ProxyResponse};
use crate::routes::RouteClass;

const CONTROL_BUFFER: usize = 8;

/// Proxy settings.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Origin the static manifest paths resolve against.
    pub base_url: Url,
    /// Deployment version; cache set names embed it.
    pub version: u32,
    /// Paths prefetched into the static set at install time. The offline
    /// page belongs in this list.
    pub static_manifest: Vec<String>,
    /// Path of the offline fallback page served to navigations when
    /// nothing else is available.
    pub offline_page: String,
    /// Deadline for the network-first strategies.
    pub network_deadline_ms: u64,
}

/// Lifecycle messages accepted while the proxy is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyControl {
    /// Promote the installed-but-waiting version to active now.
    SkipWaiting,
}

/// The network cache proxy.
pub struct CacheProxy {
    manifest: HashSet<String>,
    manifest_paths: Vec<String>,
    base_url: Url,
    offline_page: String,
    network_deadline: Duration,
    storage: CacheStorage,
    fetcher: DynFetcher,
    active_version: Arc<AtomicU32>,
    waiting_version: parking_lot::Mutex<Option<u32>>,
    control_tx: mpsc::Sender<ProxyControl>,
    control_rx: TokioMutex<mpsc::Receiver<ProxyControl>>,
}

impl CacheProxy {
    pub fn new(config: ProxyConfig, fetcher: DynFetcher) -> Self {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);
        Self {
            manifest: config.static_manifest.iter().cloned().collect(),
            manifest_paths: config.static_manifest,
            base_url: config.base_url,
            offline_page: config.offline_page,
            network_deadline: Duration::from_millis(config.network_deadline_ms),
            storage: CacheStorage::new(),
            fetcher,
            active_version: Arc::new(AtomicU32::new(config.version)),
            waiting_version: parking_lot::Mutex::new(None),
            control_tx,
            control_rx: TokioMutex::new(control_rx),
        }
    }

    pub fn active_version(&self) -> u32 {
        self.active_version.load(Ordering::SeqCst)
    }

    /// Version installed but not yet activated, if any.
    pub fn waiting_version(&self) -> Option<u32> {
        *self.waiting_version.lock()
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    /// Sender for lifecycle control messages.
    pub fn control(&self) -> mpsc::Sender<ProxyControl> {
        self.control_tx.clone()
    }

    /// Answer one request with the strategy for its route class.
    pub async fn handle(&self, request: ProxyRequest) -> ProxyResult<ProxyResponse> {
        let route = RouteClass::classify(&request, &self.manifest);
        debug!(
            method = %request.method,
            url = %request.url,
            route = route.as_str(),
            "Intercepted request"
        );

        let result = match route {
            RouteClass::Bypass => self.passthrough(request).await,
            RouteClass::StaticAsset => self.cache_first(request).await,
            RouteClass::Media => self.stale_while_revalidate(request).await,
            RouteClass::ApiGet => self.network_first(request).await,
            RouteClass::Navigation => self.navigate(request).await,
        };

        match &result {
            Ok(response) => Metrics::proxy_request(route.as_str(), response.source.as_str()),
            Err(_) => Metrics::proxy_request(route.as_str(), "error"),
        }
        result
    }

    /// Prefetch the static manifest into the new version's static set.
    ///
    /// All-or-nothing: one failed asset aborts the install, removes the
    /// partial set and leaves the previous version serving.
    pub async fn install(&self, version: u32) -> ProxyResult<()> {
        let set = CacheSet::StaticAssets.name(version);
        info!(
            version,
            assets = self.manifest_paths.len(),
            "Installing version"
        );

        for path in &self.manifest_paths {
            let url = self.base_url.join(path)?;
            let request = ProxyRequest::new(Method::GET, url);
            let key = request.cache_key();
            match self.fetcher.fetch(request).await {
                Ok(fetched) if fetched.is_success() => {
                    self.storage.put(&set, key, fetched);
                }
                Ok(fetched) => {
                    self.storage.delete_set(&set);
                    return Err(ProxyError::InstallFailed {
                        version,
                        reason: format!("{path} returned status {}", fetched.status),
                    });
                }
                Err(e) => {
                    self.storage.delete_set(&set);
                    return Err(ProxyError::InstallFailed {
                        version,
                        reason: format!("{path}: {e}"),
                    });
                }
            }
        }

        *self.waiting_version.lock() = Some(version);
        info!(version, "Version installed and waiting");
        Ok(())
    }

    /// Make `version` the serving version.
    ///
    /// Every cache set that does not belong to it is removed before the
    /// version flips, so no request is ever answered from a stale set.
    pub fn activate(&self, version: u32) {
        let keep = CacheSet::names_for(version);
        let removed = self.storage.retain_sets(&keep);
        self.active_version.store(version, Ordering::SeqCst);
        let mut waiting = self.waiting_version.lock();
        if *waiting == Some(version) {
            *waiting = None;
        }
        info!(version, removed = removed.len(), "Version activated");
    }

    /// Process control messages until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut control_rx = self.control_rx.lock().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Proxy control loop stopping");
                    break;
                }
                message = control_rx.recv() => {
                    match message {
                        Some(ProxyControl::SkipWaiting) => {
                            let waiting = *self.waiting_version.lock();
                            match waiting {
                                Some(version) => {
                                    info!(version, "Skip-waiting requested");
                                    self.activate(version);
                                }
                                None => debug!("Skip-waiting requested but no version is waiting"),
                            }
                        }
                        None => {
                            debug!("Proxy control channel closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    // ---- strategies --------------------------------------------------------

    async fn passthrough(&self, request: ProxyRequest) -> ProxyResult<ProxyResponse> {
        let fetched = self.fetcher.fetch(request).await?;
        Ok(ProxyResponse::from_network(fetched))
    }

    async fn cache_first(&self, request: ProxyRequest) -> ProxyResult<ProxyResponse> {
        let set = CacheSet::StaticAssets.name(self.active_version());
        let key = request.cache_key();
        if let Some(hit) = self.storage.get(&set, &key) {
            return Ok(ProxyResponse::from_cache(hit));
        }

        debug!(url = %request.url, "Static asset missing from cache, fetching");
        let fetched = self.fetcher.fetch(request).await?;
        if fetched.is_success() {
            self.storage.put(&set, key, fetched.clone());
        }
        Ok(ProxyResponse::from_network(fetched))
    }

    async fn stale_while_revalidate(&self, request: ProxyRequest) -> ProxyResult<ProxyResponse> {
        let set = CacheSet::DynamicContent.name(self.active_version());
        let key = request.cache_key();
        if let Some(hit) = self.storage.get(&set, &key) {
            self.spawn_refresh(request);
            return Ok(ProxyResponse::from_cache(hit));
        }

        let fetched = self.fetcher.fetch(request).await?;
        if fetched.is_success() {
            self.storage.put(&set, key, fetched.clone());
        }
        Ok(ProxyResponse::from_network(fetched))
    }

    async fn network_first(&self, request: ProxyRequest) -> ProxyResult<ProxyResponse> {
        let set = CacheSet::ApiResponses.name(self.active_version());
        let key = request.cache_key();
        match self
            .fetch_with_deadline(request, CacheSet::ApiResponses)
            .await
        {
            Ok(fetched) => Ok(ProxyResponse::from_network(fetched)),
            Err(e) => match self.storage.get(&set, &key) {
                Some(hit) => {
                    debug!(key = %key, "Network unavailable, serving cached response: {e}");
                    Ok(ProxyResponse::from_cache(hit))
                }
                None => Err(e),
            },
        }
    }

    async fn navigate(&self, request: ProxyRequest) -> ProxyResult<ProxyResponse> {
        let key = request.cache_key();
        let url = request.url.clone();
        match self
            .fetch_with_deadline(request, CacheSet::DynamicContent)
            .await
        {
            Ok(fetched) => Ok(ProxyResponse::from_network(fetched)),
            Err(e) => {
                warn!(url = %url, "Navigation fetch failed, falling back: {e}");
                let dynamic = CacheSet::DynamicContent.name(self.active_version());
                if let Some(hit) = self.storage.get(&dynamic, &key) {
                    return Ok(ProxyResponse::from_cache(hit));
                }
                if let Some(page) = self.offline_page_response() {
                    return Ok(ProxyResponse::offline_page(page));
                }
                Ok(ProxyResponse::unavailable())
            }
        }
    }

    // ---- internals ---------------------------------------------------------

    /// Race the fetch against the response deadline.
    ///
    /// A deadline loss leaves the fetch running: a late success still
    /// lands in the cache for next time, but never changes the response
    /// already returned to this caller.
    async fn fetch_with_deadline(
        &self,
        request: ProxyRequest,
        set: CacheSet,
    ) -> ProxyResult<CachedResponse> {
        let key = request.cache_key();
        let storage = self.storage.clone();
        let version = Arc::clone(&self.active_version);
        let fetcher = Arc::clone(&self.fetcher);
        let mut in_flight = tokio::spawn(async move { fetcher.fetch(request).await });

        match tokio::time::timeout(self.network_deadline, &mut in_flight).await {
            Ok(Ok(Ok(fetched))) => {
                if fetched.is_success() {
                    let name = set.name(version.load(Ordering::SeqCst));
                    storage.put(&name, key, fetched.clone());
                }
                Ok(fetched)
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(join_error)) => Err(ProxyError::Upstream(format!(
                "Fetch task failed: {join_error}"
            ))),
            Err(_) => {
                tokio::spawn(async move {
                    if let Ok(Ok(fetched)) = in_flight.await {
                        if fetched.is_success() {
                            debug!(key = %key, "Late network response cached");
                            let name = set.name(version.load(Ordering::SeqCst));
                            storage.put(&name, key, fetched);
                        }
                    }
                });
                Err(ProxyError::DeadlineExceeded {
                    ms: self.network_deadline.as_millis() as u64,
                })
            }
        }
    }

    /// Refresh a cached entry in the background.
    fn spawn_refresh(&self, request: ProxyRequest) {
        let storage = self.storage.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let version = Arc::clone(&self.active_version);
        tokio::spawn(async move {
            let key = request.cache_key();
            match fetcher.fetch(request).await {
                Ok(fresh) if fresh.is_success() => {
                    // Set name is resolved at write time so a refresh that
                    // outlives an activation lands in the current version.
                    let set = CacheSet::DynamicContent.name(version.load(Ordering::SeqCst));
                    storage.put(&set, key, fresh);
                }
                Ok(fresh) => {
                    debug!(key = %key, status = fresh.status, "Background refresh skipped")
                }
                Err(e) => debug!(key = %key, "Background refresh failed: {e}"),
            }
        });
    }

    fn offline_page_response(&self) -> Option<CachedResponse> {
        let set = CacheSet::StaticAssets.name(self.active_version());
        let url = self.base_url.join(&self.offline_page).ok()?;
        self.storage.get(&set, url.as_str())
    }
}
