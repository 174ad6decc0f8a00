//! Application assembly and lifecycle.
//!
//! `Application::new` wires the durable store, price stream, sync
//! coordinator, and cache proxy together; `run` starts the background
//! tasks and blocks until Ctrl-C, then shuts everything down in order.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pricewatch_feed::PriceCache;
use pricewatch_proxy::{CacheProxy, DynFetcher, HttpFetcher};
use pricewatch_store::LocalStore;
use pricewatch_stream::{ConnectionState, StreamClient, StreamEvent, WsConnector};
use pricewatch_sync::{ConnectivityMonitor, DynApiClient, MutationQueue, SyncCoordinator};
use pricewatch_telemetry::Metrics;

use crate::actions::UserActions;
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::http_api::HttpApiClient;

/// Fully wired application.
pub struct Application {
    store: LocalStore,
    cache: Arc<PriceCache>,
    stream: Arc<StreamClient>,
    connectivity: Arc<ConnectivityMonitor>,
    coordinator: Arc<SyncCoordinator>,
    proxy: Arc<CacheProxy>,
    actions: Arc<UserActions>,
    shutdown: CancellationToken,
}

impl Application {
    /// Build every component from configuration. No background task is
    /// started here; `run` owns the lifecycle.
    pub async fn new(config: AppConfig) -> AppResult<Self> {
        let store = LocalStore::open(&config.store.path).await?;
        Metrics::store_durable(store.is_durable());

        let cache = Arc::new(PriceCache::new());
        let stream = Arc::new(StreamClient::new(
            config.stream_config(),
            Arc::new(WsConnector::new()),
            cache.clone(),
        ));

        let api: DynApiClient = Arc::new(HttpApiClient::new(
            config.api_base_url()?,
            config.api_timeout(),
        )?);
        let queue = MutationQueue::new(store.clone());
        let connectivity = Arc::new(ConnectivityMonitor::new(false));
        let coordinator = Arc::new(SyncCoordinator::new(
            queue.clone(),
            api.clone(),
            store.clone(),
        ));

        let fetcher: DynFetcher = Arc::new(HttpFetcher::new()?);
        let proxy = Arc::new(CacheProxy::new(config.proxy_config()?, fetcher));

        let actions = Arc::new(UserActions::new(
            api,
            queue,
            store.clone(),
            stream.clone(),
            connectivity.clone(),
        ));

        Ok(Self {
            store,
            cache,
            stream,
            connectivity,
            coordinator,
            proxy,
            actions,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn actions(&self) -> Arc<UserActions> {
        self.actions.clone()
    }

    pub fn proxy(&self) -> Arc<CacheProxy> {
        self.proxy.clone()
    }

    pub fn cache(&self) -> Arc<PriceCache> {
        self.cache.clone()
    }

    /// Start background tasks and block until Ctrl-C.
    pub async fn run(self) -> AppResult<()> {
        self.spawn_state_bridge();
        self.spawn_event_metrics();
        self.spawn_price_metrics();

        // Subscriptions are restored before the first session so the
        // replay on connect covers the stored watchlist.
        let watchlist = self.store.watchlist().await?;
        if !watchlist.is_empty() {
            let symbols: Vec<String> = watchlist.into_iter().map(|e| e.symbol).collect();
            info!(count = symbols.len(), "Restoring watchlist subscriptions");
            self.stream.subscribe(symbols).await;
        }

        tokio::spawn(
            self.coordinator
                .clone()
                .run(self.connectivity.subscribe(), self.shutdown.clone()),
        );

        let version = self.proxy.active_version();
        match self.proxy.install(version).await {
            Ok(()) => self.proxy.activate(version),
            Err(e) => warn!("Initial cache install failed, serving network-only: {e}"),
        }
        tokio::spawn(self.proxy.clone().run(self.shutdown.clone()));

        self.stream.connect();
        info!("Application started");

        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");

        self.shutdown.cancel();
        self.stream.disconnect();
        self.store.close().await;
        if let Ok(snapshot) = Metrics::export() {
            debug!("Final metrics:\n{snapshot}");
        }
        info!("Shutdown complete");
        Ok(())
    }

    /// Mirror stream connection state into the connectivity monitor.
    /// An open stream is the connectivity signal that triggers drains.
    fn spawn_state_bridge(&self) {
        let monitor = self.connectivity.clone();
        let mut state_rx = self.stream.watch_state();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let state = *state_rx.borrow_and_update();
                monitor.set_online(state == ConnectionState::Open);
                Metrics::stream_state_set(state.as_str());
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn spawn_event_metrics(&self) {
        let mut events = self.stream.events();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(StreamEvent::Disconnected { reason }) => {
                            Metrics::stream_reconnect(&reason);
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }

    fn spawn_price_metrics(&self) {
        let mut updates = self.cache.subscribe();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    update = updates.recv() => match update {
                        Ok(_) => Metrics::price_update(),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_application_wires_from_default_config() {
        let mut config = AppConfig::default();
        config.store.path = std::env::temp_dir()
            .join(format!("pricewatch-app-test-{}.db", std::process::id()))
            .display()
            .to_string();

        let app = Application::new(config).await.unwrap();

        assert_eq!(app.proxy().active_version(), 1);
        assert!(app.cache().is_empty());
        assert_eq!(app.actions().watchlist().await.unwrap().len(), 0);

        app.store.close().await;
        let _ = std::fs::remove_file(
            std::env::temp_dir().join(format!("pricewatch-app-test-{}.db", std::process::id())),
        );
    }
}
