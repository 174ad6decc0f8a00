//! Latest-price cache with subscriber fan-out.
//!
//! Writes are last-write-wins per symbol: whatever arrives most recently
//! replaces the stored snapshot, no timestamp comparison. Every stored
//! update is also broadcast; subscribers that fall behind lose the oldest
//! updates (broadcast lag), which is acceptable for ticking prices since
//! the cache always holds the newest value.

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

use pricewatch_core::PriceSnapshot;

const FANOUT_CAPACITY: usize = 256;

/// Shared cache of the most recent price per symbol.
pub struct PriceCache {
    prices: DashMap<String, PriceSnapshot>,
    updates: broadcast::Sender<PriceSnapshot>,
}

impl PriceCache {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(FANOUT_CAPACITY);
        Self {
            prices: DashMap::new(),
            updates,
        }
    }

    /// Store a snapshot and notify subscribers.
    pub fn insert(&self, snapshot: PriceSnapshot) {
        trace!(symbol = %snapshot.symbol, price = %snapshot.price, "Price update");
        self.prices
            .insert(snapshot.symbol.clone(), snapshot.clone());
        // No receivers is fine; the cache is still authoritative.
        let _ = self.updates.send(snapshot);
    }

    /// Latest snapshot for a symbol, if any update has arrived.
    pub fn get(&self, symbol: &str) -> Option<PriceSnapshot> {
        self.prices.get(symbol).map(|entry| entry.value().clone())
    }

    /// Every cached snapshot, sorted by symbol.
    pub fn all(&self) -> Vec<PriceSnapshot> {
        let mut out: Vec<PriceSnapshot> = self
            .prices
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }

    /// Symbols currently present in the cache, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.prices.iter().map(|e| e.key().clone()).collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Subscribe to the update stream. Only updates after this call are
    /// delivered; use [`PriceCache::get`] for the current value.
    pub fn subscribe(&self) -> broadcast::Receiver<PriceSnapshot> {
        self.updates.subscribe()
    }

    /// Drop all cached prices. Subscribers are not notified.
    pub fn clear(&self) {
        self.prices.clear();
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new()
    }
}
