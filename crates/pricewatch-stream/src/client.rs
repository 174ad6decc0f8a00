//! Stream client lifecycle.
//!
//! One client owns one logical connection to the price feed. Sessions
//! come and go underneath it: a dropped session is retried with
//! exponential backoff until the attempt budget is spent, and every
//! freshly opened session replays the full desired subscription set
//! before normal traffic resumes. Consumers observe the client through
//! a state watch channel, a lifecycle event stream, and the shared
//! [`PriceCache`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, watch, Mutex as TokioMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pricewatch_feed::PriceCache;

use crate::error::{StreamError, StreamResult};
use crate::heartbeat::HeartbeatMonitor;
use crate::message::WireMessage;
use crate::subscriptions::SubscriptionSet;
use crate::transport::{Channel, ChannelEvent, Connector};

const OUTBOUND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 64;

/// Stream client configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// WebSocket URL of the price feed.
    pub url: String,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Idle time before a heartbeat ping goes out.
    pub heartbeat_interval_ms: u64,
    /// Time a ping may stay unanswered.
    pub heartbeat_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1000,
            heartbeat_interval_ms: 30000,
            heartbeat_timeout_ms: 10000,
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notifications, broadcast to any number of listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A session opened and the subscription set was replayed.
    Connected,
    /// The current session ended; a reconnect may follow.
    Disconnected { reason: String },
    /// A reconnect attempt was scheduled.
    ReconnectScheduled { attempt: u32, delay_ms: u64 },
    /// The attempt budget is spent; the client stays down until
    /// `connect()` is called again.
    ReconnectsExhausted { attempts: u32 },
    /// The server sent an error frame. Informational.
    ServerError { message: String },
}

enum SessionAction {
    Shutdown,
    Inbound(Option<ChannelEvent>),
    Outbound(Option<String>),
    Heartbeat,
}

enum SessionEnd {
    Shutdown,
    Dropped { reason: String },
}

/// Resilient price stream client.
pub struct StreamClient {
    config: StreamConfig,
    connector: Arc<dyn Connector>,
    cache: Arc<PriceCache>,
    subscriptions: SubscriptionSet,
    heartbeat: HeartbeatMonitor,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<StreamEvent>,
    outbound_tx: mpsc::Sender<String>,
    outbound_rx: TokioMutex<mpsc::Receiver<String>>,
    session: Mutex<Option<CancellationToken>>,
    last_error: RwLock<Option<StreamError>>,
}

impl StreamClient {
    pub fn new(config: StreamConfig, connector: Arc<dyn Connector>, cache: Arc<PriceCache>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        let heartbeat =
            HeartbeatMonitor::new(config.heartbeat_interval_ms, config.heartbeat_timeout_ms);
        Self {
            config,
            connector,
            cache,
            subscriptions: SubscriptionSet::new(),
            heartbeat,
            state_tx,
            events_tx,
            outbound_tx,
            outbound_rx: TokioMutex::new(outbound_rx),
            session: Mutex::new(None),
            last_error: RwLock::new(None),
        }
    }

    /// Start the connection loop.
    ///
    /// Idempotent: while a session loop is alive further calls do
    /// nothing. After `disconnect()` or an exhausted attempt budget this
    /// starts a fresh loop with a reset attempt counter.
    pub fn connect(self: &Arc<Self>) {
        let mut session = self.session.lock();
        if let Some(token) = session.as_ref() {
            if !token.is_cancelled() {
                debug!("connect() ignored; stream already active");
                return;
            }
        }
        self.last_error.write().take();
        let token = CancellationToken::new();
        *session = Some(token.clone());
        let client = Arc::clone(self);
        tokio::spawn(async move { client.run(token).await });
    }

    /// Tear down the connection and stop reconnecting. Idempotent.
    pub fn disconnect(&self) {
        let session = self.session.lock();
        if let Some(token) = session.as_ref() {
            if !token.is_cancelled() {
                info!("Disconnect requested");
            }
            token.cancel();
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Watch lifecycle state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.events_tx.subscribe()
    }

    /// The shared cache this client writes into.
    pub fn cache(&self) -> Arc<PriceCache> {
        Arc::clone(&self.cache)
    }

    /// The error that ended the last session, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().as_ref().map(|e| e.to_string())
    }

    /// Symbols the client keeps subscribed across reconnects.
    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.subscriptions.symbols()
    }

    /// Add symbols to the desired set.
    ///
    /// Never fails: while not connected the set is only recorded and
    /// replayed once a session opens. While open, a delta frame for the
    /// genuinely new symbols goes out.
    pub async fn subscribe<S: Into<String>>(&self, symbols: impl IntoIterator<Item = S>) {
        let added = self.subscriptions.add_all(symbols);
        if added.is_empty() {
            return;
        }
        debug!(symbols = ?added, "Subscribing");
        if self.state() == ConnectionState::Open {
            self.queue_frame(WireMessage::subscribe(added)).await;
        }
    }

    /// Remove symbols from the desired set; the delta goes out only for
    /// symbols that were actually subscribed.
    pub async fn unsubscribe<S: AsRef<str>>(&self, symbols: impl IntoIterator<Item = S>) {
        let removed = self.subscriptions.remove_all(symbols);
        if removed.is_empty() {
            return;
        }
        debug!(symbols = ?removed, "Unsubscribing");
        if self.state() == ConnectionState::Open {
            self.queue_frame(WireMessage::unsubscribe(removed)).await;
        }
    }

    async fn queue_frame(&self, frame: WireMessage) {
        match frame.to_text() {
            Ok(text) => {
                if self.outbound_tx.send(text).await.is_err() {
                    debug!("Outbound channel closed");
                }
            }
            Err(e) => warn!(error = %e, "Could not encode outbound frame"),
        }
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        let mut attempt: u32 = 0;

        loop {
            if token.is_cancelled() {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            match self.connector.connect(&self.config.url).await {
                Ok(mut channel) => {
                    attempt = 0;
                    match self.run_session(&mut *channel, &token).await {
                        SessionEnd::Shutdown => {
                            self.emit(StreamEvent::Disconnected {
                                reason: "client disconnect".to_string(),
                            });
                            break;
                        }
                        SessionEnd::Dropped { reason } => {
                            info!(%reason, "Stream session ended");
                            self.emit(StreamEvent::Disconnected { reason });
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, url = %self.config.url, "Connect failed");
                    self.record_error(e);
                }
            }

            if token.is_cancelled() {
                break;
            }

            attempt += 1;
            if attempt > self.config.max_reconnect_attempts {
                let attempts = self.config.max_reconnect_attempts;
                error!(attempts, "Reconnect attempts exhausted; staying down");
                self.record_error(StreamError::ReconnectsExhausted { attempts });
                self.emit(StreamEvent::ReconnectsExhausted { attempts });
                break;
            }

            let delay_ms = backoff_delay_ms(self.config.reconnect_base_delay_ms, attempt);
            self.set_state(ConnectionState::Reconnecting);
            self.emit(StreamEvent::ReconnectScheduled { attempt, delay_ms });
            warn!(attempt, delay_ms, "Reconnecting after delay");

            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                () = token.cancelled() => break,
            }
        }

        // Mark the session dead so a later connect() starts fresh.
        token.cancel();
        self.set_state(ConnectionState::Disconnected);
    }

    async fn run_session(&self, channel: &mut dyn Channel, token: &CancellationToken) -> SessionEnd {
        self.set_state(ConnectionState::Open);
        self.emit(StreamEvent::Connected);
        info!(url = %self.config.url, "Stream open");

        self.heartbeat.reset();
        self.drain_stale_outbound().await;

        let symbols = self.subscriptions.symbols();
        if !symbols.is_empty() {
            let count = symbols.len();
            if let Err(e) = self
                .send_frame(channel, &WireMessage::subscribe(symbols))
                .await
            {
                return SessionEnd::Dropped {
                    reason: format!("subscribe send failed: {e}"),
                };
            }
            info!(count, "Replayed subscription set");
        }

        loop {
            let action = {
                let outbound_recv = async { self.outbound_rx.lock().await.recv().await };
                tokio::select! {
                    () = token.cancelled() => SessionAction::Shutdown,
                    event = channel.recv() => SessionAction::Inbound(event),
                    outbound = outbound_recv => SessionAction::Outbound(outbound),
                    () = self.heartbeat.wait_for_check() => SessionAction::Heartbeat,
                }
            };

            match action {
                SessionAction::Shutdown => {
                    if let Err(e) = channel.close().await {
                        debug!(error = %e, "Close frame failed");
                    }
                    return SessionEnd::Shutdown;
                }
                SessionAction::Inbound(None) => {
                    return SessionEnd::Dropped {
                        reason: "stream ended".to_string(),
                    };
                }
                SessionAction::Inbound(Some(ChannelEvent::Closed { code, reason })) => {
                    warn!(?code, %reason, "Stream closed by server");
                    self.record_error(StreamError::ConnectionClosed {
                        code,
                        reason: reason.clone(),
                    });
                    return SessionEnd::Dropped { reason };
                }
                SessionAction::Inbound(Some(ChannelEvent::Message(text))) => {
                    if let Some(reply) = self.handle_frame(&text) {
                        if let Err(e) = self.send_frame(channel, &reply).await {
                            return SessionEnd::Dropped {
                                reason: format!("send failed: {e}"),
                            };
                        }
                    }
                }
                SessionAction::Outbound(Some(text)) => {
                    if let Err(e) = channel.send(&text).await {
                        return SessionEnd::Dropped {
                            reason: format!("send failed: {e}"),
                        };
                    }
                }
                SessionAction::Outbound(None) => {
                    // We hold the sender, so this only happens at teardown.
                    return SessionEnd::Shutdown;
                }
                SessionAction::Heartbeat => {
                    if self.heartbeat.is_timed_out() {
                        error!("Heartbeat timeout");
                        self.record_error(StreamError::HeartbeatTimeout {
                            timeout_ms: self.config.heartbeat_timeout_ms,
                        });
                        return SessionEnd::Dropped {
                            reason: "heartbeat timeout".to_string(),
                        };
                    }
                    if self.heartbeat.should_send_ping() {
                        if let Err(e) = self.send_frame(channel, &WireMessage::Ping).await {
                            return SessionEnd::Dropped {
                                reason: format!("ping failed: {e}"),
                            };
                        }
                        self.heartbeat.record_ping();
                        debug!("Sent heartbeat ping");
                    }
                }
            }
        }
    }

    /// Handle one inbound text frame; returns a frame to send back, if
    /// any. Frames that do not parse are dropped here.
    fn handle_frame(&self, text: &str) -> Option<WireMessage> {
        self.heartbeat.record_message();
        match serde_json::from_str::<WireMessage>(text) {
            Ok(WireMessage::PriceUpdate(payload)) => {
                self.cache.insert(payload.into_snapshot());
                None
            }
            Ok(WireMessage::Pong) => {
                self.heartbeat.record_pong();
                None
            }
            Ok(WireMessage::Ping) => Some(WireMessage::Pong),
            Ok(WireMessage::Error(err)) => {
                warn!(message = %err.message, "Server error frame");
                self.emit(StreamEvent::ServerError {
                    message: err.message,
                });
                None
            }
            Ok(WireMessage::Subscribe(_) | WireMessage::Unsubscribe(_)) => {
                debug!("Ignoring client-bound frame from server");
                None
            }
            Err(e) => {
                debug!(error = %e, "Dropping malformed frame");
                None
            }
        }
    }

    async fn send_frame(&self, channel: &mut dyn Channel, frame: &WireMessage) -> StreamResult<()> {
        let text = frame.to_text()?;
        channel.send(&text).await
    }

    async fn drain_stale_outbound(&self) {
        let mut rx = self.outbound_rx.lock().await;
        let mut drained = 0usize;
        while rx.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            debug!(drained, "Discarded stale outbound frames");
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                debug!(from = %current, to = %next, "Stream state");
                *current = next;
                true
            }
        });
    }

    fn emit(&self, event: StreamEvent) {
        // No listeners is fine.
        let _ = self.events_tx.send(event);
    }

    fn record_error(&self, error: StreamError) {
        *self.last_error.write() = Some(error);
    }
}

fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(16);
    base_ms.saturating_mul(1u64 << exponent)
}
