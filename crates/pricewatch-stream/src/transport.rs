//! Transport seam between the client and the network.
//!
//! [`Connector`] opens a [`Channel`]; the session loop only ever talks to
//! these traits, so tests swap in [`MockConnector`] and drive sessions by
//! hand. Box-pinned futures keep the traits object-safe without an
//! async-trait dependency.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::error::{StreamError, StreamResult};
use crate::message::WireMessage;

/// Boxed future for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One inbound event from an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A complete text frame.
    Message(String),
    /// The peer closed the channel.
    Closed { code: Option<u16>, reason: String },
}

/// An open bidirectional text channel.
pub trait Channel: Send {
    /// Send one text frame.
    fn send<'a>(&'a mut self, text: &'a str) -> BoxFuture<'a, StreamResult<()>>;

    /// Next inbound event. `None` means the transport is gone without a
    /// close frame.
    fn recv(&mut self) -> BoxFuture<'_, Option<ChannelEvent>>;

    /// Close the channel gracefully.
    fn close(&mut self) -> BoxFuture<'_, StreamResult<()>>;
}

/// Opens channels to a stream endpoint.
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, StreamResult<Box<dyn Channel>>>;
}

// ---- production transport --------------------------------------------------

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector used in production.
#[derive(Debug, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, StreamResult<Box<dyn Channel>>> {
        Box::pin(async move {
            info!(%url, "Connecting");
            // TCP_NODELAY: price ticks are small and latency-sensitive.
            let (stream, _response) = connect_async_tls_with_config(url, None, true, None).await?;
            Ok(Box::new(WsChannel { stream }) as Box<dyn Channel>)
        })
    }
}

struct WsChannel {
    stream: WsStream,
}

impl Channel for WsChannel {
    fn send<'a>(&'a mut self, text: &'a str) -> BoxFuture<'a, StreamResult<()>> {
        Box::pin(async move {
            self.stream.send(Message::Text(text.to_string())).await?;
            Ok(())
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Option<ChannelEvent>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Text(text))) => return Some(ChannelEvent::Message(text)),
                    Some(Ok(Message::Ping(data))) => {
                        // Transport pings are answered here; sessions only
                        // see application frames.
                        if self.stream.send(Message::Pong(data)).await.is_err() {
                            return Some(ChannelEvent::Closed {
                                code: None,
                                reason: "pong send failed".to_string(),
                            });
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                            .unwrap_or((None, "closed".to_string()));
                        return Some(ChannelEvent::Closed { code, reason });
                    }
                    Some(Ok(_)) => {
                        debug!("Ignoring non-text frame");
                    }
                    Some(Err(e)) => {
                        return Some(ChannelEvent::Closed {
                            code: None,
                            reason: e.to_string(),
                        });
                    }
                    None => return None,
                }
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, StreamResult<()>> {
        Box::pin(async move {
            self.stream.send(Message::Close(None)).await?;
            Ok(())
        })
    }
}

// ---- scripted transport for tests ------------------------------------------

enum MockOutcome {
    Accept,
    Refuse(String),
}

/// Scripted connector.
///
/// Accepts every connect by default; queue refusals with
/// [`MockConnector::refuse_next`]. Each accepted connect creates a
/// session whose inbound side is driven through [`MockSessionHandle`].
/// Frames sent by the client are recorded across all sessions.
#[derive(Default)]
pub struct MockConnector {
    outcomes: Mutex<VecDeque<MockOutcome>>,
    connects: AtomicUsize,
    sent: Arc<Mutex<Vec<String>>>,
    sessions: Mutex<Vec<MockSessionHandle>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one refused connect attempt.
    pub fn refuse_next(&self, reason: &str) {
        self.outcomes
            .lock()
            .push_back(MockOutcome::Refuse(reason.to_string()));
    }

    /// Number of connect attempts seen so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Every frame the client sent, in order, across all sessions.
    pub fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Handle for the `index`-th accepted session.
    pub fn session(&self, index: usize) -> Option<MockSessionHandle> {
        self.sessions.lock().get(index).cloned()
    }
}

impl Connector for MockConnector {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, StreamResult<Box<dyn Channel>>> {
        Box::pin(async move {
            let _ = url;
            self.connects.fetch_add(1, Ordering::SeqCst);
            let outcome = self
                .outcomes
                .lock()
                .pop_front()
                .unwrap_or(MockOutcome::Accept);
            match outcome {
                MockOutcome::Refuse(reason) => Err(StreamError::ConnectionFailed(reason)),
                MockOutcome::Accept => {
                    let (events_tx, events_rx) = mpsc::unbounded_channel();
                    let closed_by_client = Arc::new(AtomicBool::new(false));
                    self.sessions.lock().push(MockSessionHandle {
                        events: events_tx,
                        closed_by_client: closed_by_client.clone(),
                    });
                    Ok(Box::new(MockChannel {
                        events: events_rx,
                        sent: self.sent.clone(),
                        closed_by_client,
                    }) as Box<dyn Channel>)
                }
            }
        })
    }
}

/// Server-side handle to one mock session.
#[derive(Clone)]
pub struct MockSessionHandle {
    events: mpsc::UnboundedSender<ChannelEvent>,
    closed_by_client: Arc<AtomicBool>,
}

impl MockSessionHandle {
    /// Deliver a raw text frame to the client.
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.events.send(ChannelEvent::Message(text.into()));
    }

    /// Deliver an encoded protocol frame to the client.
    pub fn push_frame(&self, frame: &WireMessage) {
        if let Ok(text) = frame.to_text() {
            self.push_text(text);
        }
    }

    /// Close the session from the server side.
    pub fn close(&self, code: Option<u16>, reason: &str) {
        let _ = self.events.send(ChannelEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    /// Whether the client closed this session gracefully.
    pub fn client_closed(&self) -> bool {
        self.closed_by_client.load(Ordering::SeqCst)
    }
}

struct MockChannel {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed_by_client: Arc<AtomicBool>,
}

impl Channel for MockChannel {
    fn send<'a>(&'a mut self, text: &'a str) -> BoxFuture<'a, StreamResult<()>> {
        Box::pin(async move {
            self.sent.lock().push(text.to_string());
            Ok(())
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Option<ChannelEvent>> {
        Box::pin(async move { self.events.recv().await })
    }

    fn close(&mut self) -> BoxFuture<'_, StreamResult<()>> {
        Box::pin(async move {
            self.closed_by_client.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_sent_frames() {
        let connector = MockConnector::new();
        let mut channel = connector.connect("wss://example.test").await.unwrap();

        channel.send("hello").await.unwrap();
        channel.send("world").await.unwrap();

        assert_eq!(connector.sent_frames(), vec!["hello", "world"]);
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_refusal_then_accept() {
        let connector = MockConnector::new();
        connector.refuse_next("boom");

        let err = connector.connect("wss://example.test").await.err().unwrap();
        assert!(matches!(err, StreamError::ConnectionFailed(_)));

        assert!(connector.connect("wss://example.test").await.is_ok());
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_session_delivers_events() {
        let connector = MockConnector::new();
        let mut channel = connector.connect("wss://example.test").await.unwrap();
        let session = connector.session(0).unwrap();

        session.push_text("tick");
        session.close(Some(1001), "going away");

        assert_eq!(
            channel.recv().await,
            Some(ChannelEvent::Message("tick".to_string()))
        );
        assert_eq!(
            channel.recv().await,
            Some(ChannelEvent::Closed {
                code: Some(1001),
                reason: "going away".to_string()
            })
        );
    }
}
