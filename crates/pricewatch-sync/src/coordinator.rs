//! Queue drain coordinator.
//!
//! Replays pending mutations against the API once connectivity returns.
//! Replay is strictly FIFO and one at a time because later mutations can
//! depend on earlier ones (add a symbol to the watchlist, then create an
//! alert for it). A failed item stays queued for the next drain; it never
//! blocks the items behind it.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pricewatch_core::Mutation;
use pricewatch_store::{Collection, LocalStore};
use pricewatch_telemetry::Metrics;

use crate::api::{ApiResult, DynApiClient};
use crate::error::SyncResult;
use crate::queue::MutationQueue;

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Mutations acknowledged after a successful replay.
    pub replayed: u64,
    /// Mutations left queued after a failed replay.
    pub failed: u64,
    /// True when another drain already held the lock and this call did
    /// nothing.
    pub skipped: bool,
}

/// Drives mutation replay off the connectivity signal.
pub struct SyncCoordinator {
    queue: MutationQueue,
    api: DynApiClient,
    store: LocalStore,
    drain_lock: Mutex<()>,
}

impl SyncCoordinator {
    pub fn new(queue: MutationQueue, api: DynApiClient, store: LocalStore) -> Self {
        Self {
            queue,
            api,
            store,
            drain_lock: Mutex::new(()),
        }
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    /// Replay every pending mutation in enqueue order.
    ///
    /// Safe to call redundantly: if a drain is already running this
    /// returns immediately with `skipped` set. Each success removes the
    /// record; each failure is logged and left for the next drain. After
    /// a non-empty drain the cached watchlist and alert views are
    /// invalidated so the next read re-fetches authoritative state.
    pub async fn drain_on_reconnect(&self) -> SyncResult<DrainReport> {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            debug!("Drain already in progress, skipping");
            return Ok(DrainReport {
                skipped: true,
                ..DrainReport::default()
            });
        };

        let pending = self.queue.list_pending().await?;
        if pending.is_empty() {
            debug!("No pending mutations");
            return Ok(DrainReport::default());
        }

        info!(pending = pending.len(), "Draining pending mutations");
        let mut report = DrainReport::default();
        for item in pending {
            let kind = item.mutation.kind().to_string();
            match self.replay(&item.mutation).await {
                Ok(()) => {
                    self.queue.acknowledge(item.id).await?;
                    Metrics::mutation_replayed(&kind, "ok");
                    report.replayed += 1;
                    debug!(id = item.id, kind = %kind, "Mutation replayed");
                }
                Err(e) => {
                    Metrics::mutation_replayed(&kind, "failed");
                    report.failed += 1;
                    warn!(id = item.id, kind = %kind, "Mutation replay failed: {e}");
                }
            }
        }

        self.invalidate_views().await?;
        Metrics::drain_completed();
        info!(
            replayed = report.replayed,
            failed = report.failed,
            "Drain finished"
        );
        Ok(report)
    }

    /// Watch the connectivity signal and drain on every offline to online
    /// transition. Drains once eagerly when already online at startup.
    pub async fn run(
        self: Arc<Self>,
        mut connectivity: watch::Receiver<bool>,
        shutdown: CancellationToken,
    ) {
        if *connectivity.borrow_and_update() {
            if let Err(e) = self.drain_on_reconnect().await {
                error!("Startup drain failed: {e}");
            }
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Sync coordinator stopping");
                    break;
                }
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        debug!("Connectivity signal dropped, sync coordinator stopping");
                        break;
                    }
                    if *connectivity.borrow_and_update() {
                        if let Err(e) = self.drain_on_reconnect().await {
                            error!("Queue drain failed: {e}");
                        }
                    }
                }
            }
        }
    }

    async fn replay(&self, mutation: &Mutation) -> ApiResult<()> {
        match mutation.clone() {
            Mutation::CreateAlert(spec) => self.api.create_alert(spec).await.map(|_| ()),
            Mutation::DeleteAlert { id } => self.api.delete_alert(id).await,
            Mutation::AddWatchlist { symbol } => self.api.add_to_watchlist(symbol).await,
            Mutation::RemoveWatchlist { symbol } => self.api.remove_from_watchlist(symbol).await,
        }
    }

    async fn invalidate_views(&self) -> SyncResult<()> {
        self.store.clear(Collection::Watchlist).await?;
        self.store.clear(Collection::Alerts).await?;
        debug!("Invalidated cached watchlist and alert views");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockApiClient;
    use crate::connectivity::ConnectivityMonitor;
    use pricewatch_core::{Alert, AlertCondition, AlertSpec, WatchlistEntry};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    async fn coordinator() -> (Arc<SyncCoordinator>, Arc<MockApiClient>, LocalStore) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let api = Arc::new(MockApiClient::default());
        let queue = MutationQueue::new(store.clone());
        let coordinator = Arc::new(SyncCoordinator::new(queue, api.clone(), store.clone()));
        (coordinator, api, store)
    }

    fn sample_spec(symbol: &str) -> AlertSpec {
        AlertSpec {
            symbol: symbol.to_string(),
            condition: AlertCondition::Above,
            threshold: dec!(50000),
        }
    }

    async fn wait_until(mut ready: impl FnMut() -> bool) {
        for _ in 0..400 {
            if ready() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_drain_replays_in_enqueue_order() {
        let (coordinator, api, _store) = coordinator().await;
        let queue = coordinator.queue();
        queue
            .enqueue(&Mutation::AddWatchlist {
                symbol: "BTCUSDT".to_string(),
            })
            .await
            .unwrap();
        queue
            .enqueue(&Mutation::CreateAlert(sample_spec("BTCUSDT")))
            .await
            .unwrap();
        queue
            .enqueue(&Mutation::RemoveWatchlist {
                symbol: "DOGEUSDT".to_string(),
            })
            .await
            .unwrap();

        let report = coordinator.drain_on_reconnect().await.unwrap();
        assert_eq!(report.replayed, 3);
        assert_eq!(report.failed, 0);
        assert!(!report.skipped);

        assert_eq!(
            api.calls(),
            vec![
                "add_to_watchlist(BTCUSDT)".to_string(),
                "create_alert(BTCUSDT above 50000)".to_string(),
                "remove_from_watchlist(DOGEUSDT)".to_string(),
            ]
        );
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_replay_stays_queued_and_drain_continues() {
        let (coordinator, api, _store) = coordinator().await;
        let queue = coordinator.queue();
        queue
            .enqueue(&Mutation::AddWatchlist {
                symbol: "BTCUSDT".to_string(),
            })
            .await
            .unwrap();
        queue
            .enqueue(&Mutation::DeleteAlert {
                id: "alert-9".to_string(),
            })
            .await
            .unwrap();
        queue
            .enqueue(&Mutation::AddWatchlist {
                symbol: "ETHUSDT".to_string(),
            })
            .await
            .unwrap();

        api.fail_transport_matching("delete_alert");
        let report = coordinator.drain_on_reconnect().await.unwrap();
        assert_eq!(report.replayed, 2);
        assert_eq!(report.failed, 1);

        // The bad item did not block the one behind it.
        assert_eq!(api.call_count("add_to_watchlist"), 2);
        let pending = queue.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].mutation,
            Mutation::DeleteAlert {
                id: "alert-9".to_string()
            }
        );

        // Next connectivity signal retries what was left.
        api.clear_failures();
        let report = coordinator.drain_on_reconnect().await.unwrap();
        assert_eq!(report.replayed, 1);
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_drains_never_replay_twice() {
        let (coordinator, api, _store) = coordinator().await;
        let queue = coordinator.queue();
        for symbol in ["BTCUSDT", "ETHUSDT", "SOLUSDT"] {
            queue
                .enqueue(&Mutation::AddWatchlist {
                    symbol: symbol.to_string(),
                })
                .await
                .unwrap();
        }

        let (a, b) = tokio::join!(
            coordinator.drain_on_reconnect(),
            coordinator.drain_on_reconnect()
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.replayed + b.replayed, 3);
        assert!(a.skipped || b.skipped || a.replayed == 0 || b.replayed == 0);
        assert_eq!(api.call_count("add_to_watchlist"), 3);
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_empty_drain_invalidates_cached_views() {
        let (coordinator, _api, store) = coordinator().await;
        store
            .replace_watchlist(&[WatchlistEntry::new("BTCUSDT".to_string())])
            .await
            .unwrap();
        store
            .replace_alerts(&[Alert::from_spec(
                "alert-1".to_string(),
                &sample_spec("BTCUSDT"),
            )])
            .await
            .unwrap();

        // Empty queue: nothing replayed, views untouched.
        coordinator.drain_on_reconnect().await.unwrap();
        assert_eq!(store.watchlist().await.unwrap().len(), 1);

        coordinator
            .queue()
            .enqueue(&Mutation::AddWatchlist {
                symbol: "ETHUSDT".to_string(),
            })
            .await
            .unwrap();
        coordinator.drain_on_reconnect().await.unwrap();

        assert!(store.watchlist().await.unwrap().is_empty());
        assert!(store.alerts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_drains_eagerly_when_already_online() {
        let (coordinator, api, _store) = coordinator().await;
        coordinator
            .queue()
            .enqueue(&Mutation::AddWatchlist {
                symbol: "BTCUSDT".to_string(),
            })
            .await
            .unwrap();

        let monitor = ConnectivityMonitor::new(true);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(coordinator.clone().run(monitor.subscribe(), shutdown.clone()));

        let api_probe = api.clone();
        wait_until(move || api_probe.call_count("add_to_watchlist") == 1).await;
        assert_eq!(coordinator.queue().depth().await.unwrap(), 0);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_drains_on_offline_to_online_transition() {
        let (coordinator, api, _store) = coordinator().await;
        let monitor = ConnectivityMonitor::new(false);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(coordinator.clone().run(monitor.subscribe(), shutdown.clone()));

        coordinator
            .queue()
            .enqueue(&Mutation::DeleteAlert {
                id: "alert-3".to_string(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(api.call_count("delete_alert"), 0);

        monitor.set_online(true);
        let api_probe = api.clone();
        wait_until(move || api_probe.call_count("delete_alert(alert-3)") == 1).await;
        assert_eq!(coordinator.queue().depth().await.unwrap(), 0);

        // Going offline and back online drains whatever queued meanwhile.
        monitor.set_online(false);
        coordinator
            .queue()
            .enqueue(&Mutation::AddWatchlist {
                symbol: "SOLUSDT".to_string(),
            })
            .await
            .unwrap();
        monitor.set_online(true);
        let api_probe = api.clone();
        wait_until(move || api_probe.call_count("add_to_watchlist(SOLUSDT)") == 1).await;

        shutdown.cancel();
        task.await.unwrap();
    }
}
