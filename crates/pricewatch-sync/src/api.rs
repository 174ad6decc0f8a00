//! API collaborator trait.
//!
//! The queue and coordinator only care about the input shape of each
//! operation and whether it succeeded; the concrete HTTP client lives
//! in the application crate. Box-pinned futures keep the trait
//! object-safe so the coordinator can hold `Arc<dyn ApiClient>`.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

use pricewatch_core::{Alert, AlertSpec, Coin, MarketOverview, WatchlistEntry};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// API failure taxonomy.
///
/// The split matters for queueing: a transport failure means the action
/// should be queued and replayed later, while a rejection means the
/// server saw the request and said no.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server rejected request: status={status}, body={body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid response body: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    /// Whether this failure is worth retrying once connectivity returns.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Remote API operations the resilience layer depends on.
pub trait ApiClient: Send + Sync {
    fn get_watchlist(&self) -> BoxFuture<'_, ApiResult<Vec<WatchlistEntry>>>;

    fn add_to_watchlist(&self, symbol: String) -> BoxFuture<'_, ApiResult<()>>;

    fn remove_from_watchlist(&self, symbol: String) -> BoxFuture<'_, ApiResult<()>>;

    fn get_alerts(&self) -> BoxFuture<'_, ApiResult<Vec<Alert>>>;

    /// The server assigns the alert id.
    fn create_alert(&self, spec: AlertSpec) -> BoxFuture<'_, ApiResult<Alert>>;

    fn delete_alert(&self, id: String) -> BoxFuture<'_, ApiResult<()>>;

    fn get_market_overview(&self) -> BoxFuture<'_, ApiResult<MarketOverview>>;

    fn get_available_coins(
        &self,
        search: Option<String>,
        limit: Option<u32>,
    ) -> BoxFuture<'_, ApiResult<Vec<Coin>>>;
}

/// Arc wrapper for ApiClient trait objects.
pub type DynApiClient = Arc<dyn ApiClient>;

enum MockFailure {
    Transport,
    Rejected(u16),
}

/// In-memory API double for tests.
///
/// Records every call, keeps real server-side state for watchlist and
/// alerts, and fails calls whose signature matches a scripted pattern.
#[derive(Default)]
pub struct MockApiClient {
    calls: parking_lot::Mutex<Vec<String>>,
    failures: parking_lot::Mutex<Vec<(String, MockFailure)>>,
    watchlist: parking_lot::Mutex<Vec<WatchlistEntry>>,
    alerts: parking_lot::Mutex<Vec<Alert>>,
    coins: parking_lot::Mutex<Vec<Coin>>,
    market: parking_lot::Mutex<Option<MarketOverview>>,
    alert_seq: AtomicU64,
}

impl MockApiClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail calls whose signature contains `pattern` with a transport
    /// error.
    pub fn fail_transport_matching(&self, pattern: &str) {
        self.failures
            .lock()
            .push((pattern.to_string(), MockFailure::Transport));
    }

    /// Fail calls whose signature contains `pattern` with a server
    /// rejection.
    pub fn reject_matching(&self, pattern: &str, status: u16) {
        self.failures
            .lock()
            .push((pattern.to_string(), MockFailure::Rejected(status)));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Every call signature seen, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// How many calls matched `pattern`.
    pub fn call_count(&self, pattern: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    /// Current server-side watchlist state.
    pub fn server_watchlist(&self) -> Vec<WatchlistEntry> {
        self.watchlist.lock().clone()
    }

    /// Current server-side alerts state.
    pub fn server_alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn set_coins(&self, coins: Vec<Coin>) {
        *self.coins.lock() = coins;
    }

    pub fn set_market_overview(&self, overview: MarketOverview) {
        *self.market.lock() = Some(overview);
    }

    fn check(&self, call: &str) -> ApiResult<()> {
        self.calls.lock().push(call.to_string());
        for (pattern, failure) in self.failures.lock().iter() {
            if call.contains(pattern.as_str()) {
                return Err(match failure {
                    MockFailure::Transport => {
                        ApiError::Transport(format!("scripted failure for {call}"))
                    }
                    MockFailure::Rejected(status) => ApiError::Rejected {
                        status: *status,
                        body: format!("scripted rejection for {call}"),
                    },
                });
            }
        }
        Ok(())
    }
}

impl ApiClient for MockApiClient {
    fn get_watchlist(&self) -> BoxFuture<'_, ApiResult<Vec<WatchlistEntry>>> {
        Box::pin(async move {
            self.check("get_watchlist")?;
            Ok(self.watchlist.lock().clone())
        })
    }

    fn add_to_watchlist(&self, symbol: String) -> BoxFuture<'_, ApiResult<()>> {
        Box::pin(async move {
            self.check(&format!("add_to_watchlist({symbol})"))?;
            let mut watchlist = self.watchlist.lock();
            if !watchlist.iter().any(|e| e.symbol == symbol) {
                watchlist.push(WatchlistEntry::new(symbol));
            }
            Ok(())
        })
    }

    fn remove_from_watchlist(&self, symbol: String) -> BoxFuture<'_, ApiResult<()>> {
        Box::pin(async move {
            self.check(&format!("remove_from_watchlist({symbol})"))?;
            self.watchlist.lock().retain(|e| e.symbol != symbol);
            Ok(())
        })
    }

    fn get_alerts(&self) -> BoxFuture<'_, ApiResult<Vec<Alert>>> {
        Box::pin(async move {
            self.check("get_alerts")?;
            Ok(self.alerts.lock().clone())
        })
    }

    fn create_alert(&self, spec: AlertSpec) -> BoxFuture<'_, ApiResult<Alert>> {
        Box::pin(async move {
            self.check(&format!(
                "create_alert({} {} {})",
                spec.symbol, spec.condition, spec.threshold
            ))?;
            let id = format!("alert-{}", self.alert_seq.fetch_add(1, Ordering::SeqCst) + 1);
            let alert = Alert::from_spec(id, &spec);
            self.alerts.lock().push(alert.clone());
            Ok(alert)
        })
    }

    fn delete_alert(&self, id: String) -> BoxFuture<'_, ApiResult<()>> {
        Box::pin(async move {
            self.check(&format!("delete_alert({id})"))?;
            self.alerts.lock().retain(|a| a.id != id);
            Ok(())
        })
    }

    fn get_market_overview(&self) -> BoxFuture<'_, ApiResult<MarketOverview>> {
        Box::pin(async move {
            self.check("get_market_overview")?;
            self.market.lock().clone().ok_or(ApiError::Rejected {
                status: 404,
                body: "no overview configured".to_string(),
            })
        })
    }

    fn get_available_coins(
        &self,
        search: Option<String>,
        limit: Option<u32>,
    ) -> BoxFuture<'_, ApiResult<Vec<Coin>>> {
        Box::pin(async move {
            self.check(&format!("get_available_coins({search:?},{limit:?})"))?;
            let needle = search.unwrap_or_default().to_lowercase();
            let mut out: Vec<Coin> = self
                .coins
                .lock()
                .iter()
                .filter(|c| {
                    needle.is_empty()
                        || c.symbol.to_lowercase().contains(&needle)
                        || c.name.to_lowercase().contains(&needle)
                })
                .cloned()
                .collect();
            if let Some(limit) = limit {
                out.truncate(limit as usize);
            }
            Ok(out)
        })
    }
}
