//! Prometheus metrics for the resilience layer.
//!
//! Covers the stream lifecycle, the offline mutation queue, and the
//! caching proxy.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally: a registration
//! failure means duplicate metric names, which should crash at startup
//! rather than fail silently. These panics only occur during static
//! initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_int_counter, register_int_gauge,
    CounterVec, Encoder, GaugeVec, IntCounter, IntGauge, TextEncoder,
};

use crate::error::TelemetryResult;

/// Stream state machine current state.
/// Labels: state (disconnected/connecting/open/reconnecting)
pub static STREAM_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "pricewatch_stream_state",
        "Stream state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Total stream reconnect attempts.
pub static STREAM_RECONNECTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pricewatch_stream_reconnects_total",
        "Total stream reconnect attempts",
        &["reason"]
    )
    .unwrap()
});

/// Total price updates landed in the cache.
pub static PRICE_UPDATES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pricewatch_price_updates_total",
        "Total price updates landed in the cache"
    )
    .unwrap()
});

/// Total mutations enqueued while offline.
pub static MUTATIONS_ENQUEUED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pricewatch_mutations_enqueued_total",
        "Total mutations appended to the offline queue",
        &["kind"]
    )
    .unwrap()
});

/// Total mutation replay attempts by outcome.
pub static MUTATIONS_REPLAYED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pricewatch_mutations_replayed_total",
        "Total mutation replay attempts",
        &["kind", "outcome"]
    )
    .unwrap()
});

/// Current offline queue depth.
pub static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "pricewatch_queue_depth",
        "Pending mutations waiting for replay"
    )
    .unwrap()
});

/// Total completed queue drains.
pub static DRAINS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pricewatch_drains_total",
        "Total completed offline-queue drains"
    )
    .unwrap()
});

/// Proxy requests by route class and answer source.
pub static PROXY_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pricewatch_proxy_requests_total",
        "Proxy requests answered, by route class and source",
        &["route", "source"]
    )
    .unwrap()
});

/// Whether the local store is on disk (1) or degraded to memory (0).
pub static STORE_DURABLE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "pricewatch_store_durable",
        "Local store durability (1=on disk, 0=in memory)"
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Set the stream state machine state.
    /// Only the active state is set to 1, all others to 0.
    pub fn stream_state_set(state: &str) {
        for s in &["disconnected", "connecting", "open", "reconnecting"] {
            STREAM_STATE.with_label_values(&[s]).set(0.0);
        }
        STREAM_STATE.with_label_values(&[state]).set(1.0);
    }

    /// Record a reconnect attempt.
    pub fn stream_reconnect(reason: &str) {
        STREAM_RECONNECTS_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record one price update landing in the cache.
    pub fn price_update() {
        PRICE_UPDATES_TOTAL.inc();
    }

    /// Record a mutation entering the queue.
    pub fn mutation_enqueued(kind: &str) {
        MUTATIONS_ENQUEUED_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Record a replay attempt.
    pub fn mutation_replayed(kind: &str, outcome: &str) {
        MUTATIONS_REPLAYED_TOTAL
            .with_label_values(&[kind, outcome])
            .inc();
    }

    /// Update the queue depth gauge.
    pub fn queue_depth(depth: i64) {
        QUEUE_DEPTH.set(depth);
    }

    /// Record a completed drain.
    pub fn drain_completed() {
        DRAINS_TOTAL.inc();
    }

    /// Record one proxied request.
    pub fn proxy_request(route: &str, source: &str) {
        PROXY_REQUESTS_TOTAL.with_label_values(&[route, source]).inc();
    }

    /// Record store durability after open.
    pub fn store_durable(durable: bool) {
        STORE_DURABLE.set(if durable { 1 } else { 0 });
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn export() -> TelemetryResult<String> {
        let families = prometheus::gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
