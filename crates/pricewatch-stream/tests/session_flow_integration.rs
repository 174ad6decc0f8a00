//! Integration tests for full stream sessions over the public API.
//!
//! Drives a real `StreamClient` against the scripted transport: frames
//! in, cache and lifecycle events out. Covers subscription replay on a
//! fresh session, malformed-frame tolerance and server error frames.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use tokio::time::timeout;

use pricewatch_feed::PriceCache;
use pricewatch_stream::{
    ConnectionState, MockConnector, StreamClient, StreamConfig, StreamEvent, WireMessage,
};

fn fast_config() -> StreamConfig {
    StreamConfig {
        url: "wss://stream.test/prices".to_string(),
        max_reconnect_attempts: 5,
        reconnect_base_delay_ms: 10,
        // Long enough that no heartbeat fires during a test.
        heartbeat_interval_ms: 60_000,
        heartbeat_timeout_ms: 10_000,
    }
}

fn client() -> (Arc<StreamClient>, Arc<MockConnector>, Arc<PriceCache>) {
    let connector = Arc::new(MockConnector::new());
    let cache = Arc::new(PriceCache::new());
    let client = Arc::new(StreamClient::new(
        fast_config(),
        connector.clone(),
        cache.clone(),
    ));
    (client, connector, cache)
}

async fn wait_for_state(client: &StreamClient, target: ConnectionState) {
    let mut states = client.watch_state();
    timeout(Duration::from_secs(2), async {
        loop {
            if *states.borrow_and_update() == target {
                return;
            }
            states.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never reached state {target}"));
}

async fn wait_until(mut ready: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !ready() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn price_frame(symbol: &str, price: &str) -> String {
    format!(
        r#"{{"type":"price_update","payload":{{"symbol":"{symbol}","price":{price},"change24hPct":0.5,"volume24h":1000,"updatedAt":1700000000000}}}}"#
    )
}

fn parse_sent(frame: &str) -> WireMessage {
    serde_json::from_str(frame).expect("client sent an undecodable frame")
}

/// Ticks delivered on an open session land in the shared price cache.
#[tokio::test]
async fn test_price_frames_flow_into_the_shared_cache() {
    let (client, connector, cache) = client();
    client.subscribe(["BTCUSDT"]).await;
    client.connect();
    wait_for_state(&client, ConnectionState::Open).await;

    let session = connector.session(0).unwrap();
    session.push_text(price_frame("BTCUSDT", "50123.45"));

    let probe = cache.clone();
    wait_until(move || probe.get("BTCUSDT").is_some()).await;
    let snapshot = cache.get("BTCUSDT").unwrap();
    assert_eq!(snapshot.price, dec!(50123.45));
    assert_eq!(snapshot.change24h, dec!(0.5));

    client.disconnect();
}

/// Every new session starts with one subscribe frame carrying the full
/// subscription set, including symbols added while a previous session
/// was up.
#[tokio::test]
async fn test_new_session_replays_the_full_subscription_set() {
    let (client, connector, _cache) = client();
    client.subscribe(["BTCUSDT"]).await;
    client.connect();
    wait_for_state(&client, ConnectionState::Open).await;

    // Added mid-session: goes out as a delta now, and must come back in
    // the replay later.
    client.subscribe(["ETHUSDT"]).await;
    let probe = connector.clone();
    wait_until(move || probe.sent_frames().len() >= 2).await;

    connector.session(0).unwrap().close(Some(1012), "restart");
    let probe = connector.clone();
    wait_until(move || probe.connect_count() == 2).await;
    // The replay goes out right after the new session opens.
    let probe = connector.clone();
    wait_until(move || probe.sent_frames().len() >= 3).await;

    let frames = connector.sent_frames();
    let replay = parse_sent(frames.last().unwrap());
    match replay {
        WireMessage::Subscribe(list) => {
            assert_eq!(list.symbols, vec!["BTCUSDT", "ETHUSDT"]);
        }
        other => panic!("expected a subscribe replay, got {other:?}"),
    }

    client.disconnect();
}

/// Frames that do not decode are dropped; the session stays open and
/// later good frames still apply.
#[tokio::test]
async fn test_malformed_frames_do_not_break_the_session() {
    let (client, connector, cache) = client();
    client.connect();
    wait_for_state(&client, ConnectionState::Open).await;

    let session = connector.session(0).unwrap();
    session.push_text("not json at all");
    session.push_text(r#"{"type":"mystery","payload":{}}"#);
    session.push_text(price_frame("ETHUSDT", "3000.5"));

    let probe = cache.clone();
    wait_until(move || probe.get("ETHUSDT").is_some()).await;
    assert_eq!(client.state(), ConnectionState::Open);
    assert_eq!(connector.connect_count(), 1);

    client.disconnect();
}

/// A server error frame is surfaced as an event without ending the
/// session.
#[tokio::test]
async fn test_server_error_frames_surface_without_closing() {
    let (client, connector, _cache) = client();
    let mut events = client.events();
    client.connect();
    wait_for_state(&client, ConnectionState::Open).await;

    connector
        .session(0)
        .unwrap()
        .push_text(r#"{"type":"error","payload":{"message":"unknown symbol"}}"#);

    let event = timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await.unwrap() {
                StreamEvent::ServerError { message } => return message,
                _ => continue,
            }
        }
    })
    .await
    .expect("no server error event");
    assert_eq!(event, "unknown symbol");
    assert_eq!(client.state(), ConnectionState::Open);

    client.disconnect();
}

/// Unsubscribing on a live session sends a delta frame and shrinks the
/// set that later replays would carry.
#[tokio::test]
async fn test_unsubscribe_sends_a_delta_and_shrinks_the_set() {
    let (client, connector, _cache) = client();
    client.subscribe(["BTCUSDT", "ETHUSDT"]).await;
    client.connect();
    wait_for_state(&client, ConnectionState::Open).await;

    client.unsubscribe(["ETHUSDT"]).await;
    let probe = connector.clone();
    wait_until(move || {
        probe
            .sent_frames()
            .iter()
            .any(|frame| frame.contains("unsubscribe"))
    })
    .await;

    let frames = connector.sent_frames();
    let delta = frames
        .iter()
        .find(|frame| frame.contains("unsubscribe"))
        .unwrap();
    match parse_sent(delta) {
        WireMessage::Unsubscribe(list) => assert_eq!(list.symbols, vec!["ETHUSDT"]),
        other => panic!("expected an unsubscribe delta, got {other:?}"),
    }
    assert_eq!(client.subscribed_symbols(), vec!["BTCUSDT"]);

    client.disconnect();
}
