//! Heartbeat tracking for stream sessions.
//!
//! A ping goes out after `interval_ms` without any inbound traffic; if
//! the matching pong does not arrive within `timeout_ms` the session is
//! considered dead. Built on `tokio::time::Instant` so it follows the
//! runtime clock in tests.

use parking_lot::RwLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Tracks ping/pong timing and inbound activity for one client.
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    last_ping: RwLock<Option<Instant>>,
    last_activity: RwLock<Instant>,
    waiting_for_pong: RwLock<bool>,
}

impl HeartbeatMonitor {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            last_ping: RwLock::new(None),
            last_activity: RwLock::new(Instant::now()),
            waiting_for_pong: RwLock::new(false),
        }
    }

    /// Reset state at session start.
    pub fn reset(&self) {
        *self.last_ping.write() = None;
        *self.last_activity.write() = Instant::now();
        *self.waiting_for_pong.write() = false;
    }

    /// Record that a ping was sent.
    pub fn record_ping(&self) {
        *self.last_ping.write() = Some(Instant::now());
        *self.waiting_for_pong.write() = true;
    }

    /// Record that the pong arrived.
    pub fn record_pong(&self) {
        *self.waiting_for_pong.write() = false;
        if let Some(ping_time) = *self.last_ping.read() {
            let rtt_ms = ping_time.elapsed().as_millis();
            debug!(rtt_ms, "Pong received");
        }
    }

    /// Record any inbound frame. Traffic counts as liveness, so pings
    /// are suppressed while data is flowing.
    pub fn record_message(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// True when a sent ping has gone unanswered past the timeout.
    pub fn is_timed_out(&self) -> bool {
        if !*self.waiting_for_pong.read() {
            return false;
        }
        match *self.last_ping.read() {
            Some(ping_time) => ping_time.elapsed() > self.timeout,
            None => false,
        }
    }

    /// True when the connection has been silent long enough to probe.
    pub fn should_send_ping(&self) -> bool {
        if *self.waiting_for_pong.read() {
            return false;
        }
        self.last_activity.read().elapsed() >= self.interval
    }

    /// Sleep until the next health check.
    pub async fn wait_for_check(&self) {
        tokio::time::sleep(self.interval / 2).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ping_due_only_after_idle_interval() {
        let hb = HeartbeatMonitor::new(30_000, 10_000);
        hb.reset();
        assert!(!hb.should_send_ping());

        tokio::time::advance(Duration::from_millis(30_000)).await;
        assert!(hb.should_send_ping());

        hb.record_message();
        assert!(!hb.should_send_ping());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_requires_unanswered_ping() {
        let hb = HeartbeatMonitor::new(30_000, 10_000);
        hb.reset();
        assert!(!hb.is_timed_out());

        hb.record_ping();
        tokio::time::advance(Duration::from_millis(9_000)).await;
        assert!(!hb.is_timed_out());

        tokio::time::advance(Duration::from_millis(2_000)).await;
        assert!(hb.is_timed_out());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_clears_waiting_state() {
        let hb = HeartbeatMonitor::new(30_000, 10_000);
        hb.record_ping();
        assert!(!hb.should_send_ping());

        hb.record_pong();
        tokio::time::advance(Duration::from_millis(30_000)).await;
        assert!(hb.should_send_ping());
        assert!(!hb.is_timed_out());
    }
}
