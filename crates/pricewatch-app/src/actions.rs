//! User-facing actions with offline queueing.
//!
//! Every mutating action takes the same path: apply against the server
//! when the device is online, queue for replay when it is offline or
//! the transport fails mid-flight. Server rejections are never queued;
//! the caller gets the error and local state is rolled back where a
//! speculative change was made.
//!
//! Reads are network-first: a successful fetch refreshes the durable
//! snapshot before returning, and transport failures fall back to
//! whatever snapshot the store already has.

use std::sync::Arc;

use tracing::{debug, info, warn};

use pricewatch_core::{Alert, AlertSpec, Coin, MarketOverview, Mutation, WatchlistEntry};
use pricewatch_store::{Collection, LocalStore};
use pricewatch_stream::StreamClient;
use pricewatch_sync::{ConnectivityMonitor, DynApiClient, MutationQueue};

use crate::error::AppResult;

/// How a mutating action was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The server accepted the action and the local snapshot is updated.
    Applied,
    /// The action is queued and will replay once connectivity returns.
    Queued,
}

/// Entry point for watchlist, alert, and market-data operations.
pub struct UserActions {
    api: DynApiClient,
    queue: MutationQueue,
    store: LocalStore,
    stream: Arc<StreamClient>,
    connectivity: Arc<ConnectivityMonitor>,
}

impl UserActions {
    pub fn new(
        api: DynApiClient,
        queue: MutationQueue,
        store: LocalStore,
        stream: Arc<StreamClient>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        Self {
            api,
            queue,
            store,
            stream,
            connectivity,
        }
    }

    /// Add a symbol to the watchlist.
    ///
    /// The stream subscription is updated first in both paths: the
    /// subscription set is local state replayed on the next open
    /// session, so it must track intent even while offline. On a server
    /// rejection the subscription is rolled back.
    pub async fn add_to_watchlist(&self, symbol: &str) -> AppResult<ActionOutcome> {
        self.stream.subscribe([symbol]).await;

        if !self.connectivity.is_online() {
            return self.enqueue(Mutation::AddWatchlist {
                symbol: symbol.to_string(),
            })
            .await;
        }

        match self.api.add_to_watchlist(symbol.to_string()).await {
            Ok(()) => {
                self.store
                    .put(Collection::Watchlist, symbol, &WatchlistEntry::new(symbol))
                    .await?;
                Ok(ActionOutcome::Applied)
            }
            Err(e) if e.is_transport() => {
                warn!(symbol, "Watchlist add failed in flight, queueing: {e}");
                self.enqueue(Mutation::AddWatchlist {
                    symbol: symbol.to_string(),
                })
                .await
            }
            Err(e) => {
                self.stream.unsubscribe([symbol]).await;
                Err(e.into())
            }
        }
    }

    /// Remove a symbol from the watchlist.
    ///
    /// The stream unsubscribe is not rolled back on rejection; a
    /// rejected removal means the server no longer tracks the symbol
    /// either way.
    pub async fn remove_from_watchlist(&self, symbol: &str) -> AppResult<ActionOutcome> {
        self.stream.unsubscribe([symbol]).await;

        if !self.connectivity.is_online() {
            return self.enqueue(Mutation::RemoveWatchlist {
                symbol: symbol.to_string(),
            })
            .await;
        }

        match self.api.remove_from_watchlist(symbol.to_string()).await {
            Ok(()) => {
                self.store.delete(Collection::Watchlist, symbol).await?;
                Ok(ActionOutcome::Applied)
            }
            Err(e) if e.is_transport() => {
                warn!(symbol, "Watchlist remove failed in flight, queueing: {e}");
                self.enqueue(Mutation::RemoveWatchlist {
                    symbol: symbol.to_string(),
                })
                .await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create a price alert. The server assigns the id, so a queued
    /// creation has no local alert record until it replays.
    pub async fn create_alert(&self, spec: AlertSpec) -> AppResult<ActionOutcome> {
        if !self.connectivity.is_online() {
            return self.enqueue(Mutation::CreateAlert(spec)).await;
        }

        match self.api.create_alert(spec.clone()).await {
            Ok(alert) => {
                self.store
                    .put(Collection::Alerts, &alert.id, &alert)
                    .await?;
                Ok(ActionOutcome::Applied)
            }
            Err(e) if e.is_transport() => {
                warn!(symbol = %spec.symbol, "Alert create failed in flight, queueing: {e}");
                self.enqueue(Mutation::CreateAlert(spec)).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete an alert by its server-assigned id.
    pub async fn delete_alert(&self, id: &str) -> AppResult<ActionOutcome> {
        if !self.connectivity.is_online() {
            return self.enqueue(Mutation::DeleteAlert { id: id.to_string() }).await;
        }

        match self.api.delete_alert(id.to_string()).await {
            Ok(()) => {
                self.store.delete(Collection::Alerts, id).await?;
                Ok(ActionOutcome::Applied)
            }
            Err(e) if e.is_transport() => {
                warn!(id, "Alert delete failed in flight, queueing: {e}");
                self.enqueue(Mutation::DeleteAlert { id: id.to_string() }).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Current watchlist: fresh from the server when reachable, the
    /// stored snapshot otherwise.
    pub async fn watchlist(&self) -> AppResult<Vec<WatchlistEntry>> {
        if self.connectivity.is_online() {
            match self.api.get_watchlist().await {
                Ok(entries) => {
                    self.store.replace_watchlist(&entries).await?;
                    return Ok(entries);
                }
                Err(e) if e.is_transport() => {
                    debug!("Watchlist fetch failed, serving snapshot: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.store.watchlist().await?)
    }

    /// Current alerts: fresh when reachable, stored snapshot otherwise.
    pub async fn alerts(&self) -> AppResult<Vec<Alert>> {
        if self.connectivity.is_online() {
            match self.api.get_alerts().await {
                Ok(alerts) => {
                    self.store.replace_alerts(&alerts).await?;
                    return Ok(alerts);
                }
                Err(e) if e.is_transport() => {
                    debug!("Alerts fetch failed, serving snapshot: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.store.alerts().await?)
    }

    /// Market overview: fresh when reachable, stored snapshot otherwise.
    pub async fn market_overview(&self) -> AppResult<Option<MarketOverview>> {
        if self.connectivity.is_online() {
            match self.api.get_market_overview().await {
                Ok(overview) => {
                    self.store.put_market_overview(&overview).await?;
                    return Ok(Some(overview));
                }
                Err(e) if e.is_transport() => {
                    debug!("Overview fetch failed, serving snapshot: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.store.market_overview().await?)
    }

    /// Search the instrument list.
    ///
    /// Fresh results are upserted into the stored coin list rather than
    /// replacing it, so a narrow search never shrinks the offline
    /// catalogue.
    pub async fn search_coins(&self, query: &str, limit: Option<u32>) -> AppResult<Vec<Coin>> {
        if self.connectivity.is_online() {
            let search = (!query.is_empty()).then(|| query.to_string());
            match self.api.get_available_coins(search, limit).await {
                Ok(coins) => {
                    let items: Vec<(String, &Coin)> =
                        coins.iter().map(|c| (c.symbol.clone(), c)).collect();
                    self.store.put_many(Collection::Coins, &items).await?;
                    return Ok(coins);
                }
                Err(e) if e.is_transport() => {
                    debug!(query, "Coin search failed, serving snapshot: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.store.search_coins(query, limit).await?)
    }

    async fn enqueue(&self, mutation: Mutation) -> AppResult<ActionOutcome> {
        let id = self.queue.enqueue(&mutation).await?;
        info!(id, kind = %mutation.kind(), "Action queued for replay");
        Ok(ActionOutcome::Queued)
    }
}
