//! Wire protocol for the price stream.
//!
//! Every frame is a JSON envelope `{"type": ..., "payload": ...}` where
//! `payload` is absent for bodyless frames (ping, pong). Frames that do
//! not parse into this shape are dropped by the session loop without
//! surfacing an error.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pricewatch_core::PriceSnapshot;

/// One protocol frame, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WireMessage {
    /// Client to server: start streaming these symbols.
    Subscribe(SymbolList),
    /// Client to server: stop streaming these symbols.
    Unsubscribe(SymbolList),
    /// Server to client: one tick for one symbol.
    PriceUpdate(PriceUpdatePayload),
    /// Application-level heartbeat probe.
    Ping,
    /// Heartbeat answer.
    Pong,
    /// Server-reported error. Informational; the connection stays up.
    Error(ErrorPayload),
}

impl WireMessage {
    pub fn subscribe(symbols: Vec<String>) -> Self {
        Self::Subscribe(SymbolList { symbols })
    }

    pub fn unsubscribe(symbols: Vec<String>) -> Self {
        Self::Unsubscribe(SymbolList { symbols })
    }

    /// Serialize to the text that goes on the wire.
    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Symbols named by a subscribe or unsubscribe request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolList {
    pub symbols: Vec<String>,
}

/// One price tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdatePayload {
    pub symbol: String,
    pub price: Decimal,
    #[serde(rename = "change24hPct")]
    pub change_24h_pct: Decimal,
    #[serde(rename = "volume24h")]
    pub volume_24h: Decimal,
    /// Server timestamp, epoch milliseconds.
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

impl PriceUpdatePayload {
    /// Convert to the cached snapshot form. An out-of-range timestamp
    /// falls back to the receive time.
    pub fn into_snapshot(self) -> PriceSnapshot {
        let timestamp = DateTime::from_timestamp_millis(self.updated_at).unwrap_or_else(Utc::now);
        PriceSnapshot {
            symbol: self.symbol,
            price: self.price,
            change24h: self.change_24h_pct,
            volume24h: self.volume_24h,
            timestamp,
        }
    }
}

/// Body of a server error frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_subscribe_wire_shape() {
        let msg = WireMessage::subscribe(vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
        let text = msg.to_text().unwrap();
        assert_eq!(
            text,
            r#"{"type":"subscribe","payload":{"symbols":["BTCUSDT","ETHUSDT"]}}"#
        );
    }

    #[test]
    fn test_ping_has_no_payload_key() {
        let text = WireMessage::Ping.to_text().unwrap();
        assert_eq!(text, r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_price_update_parses_camel_case_fields() {
        let text = r#"{
            "type": "price_update",
            "payload": {
                "symbol": "BTCUSDT",
                "price": 50123.45,
                "change24hPct": -2.1,
                "volume24h": 1234567.89,
                "updatedAt": 1700000000000
            }
        }"#;
        let msg: WireMessage = serde_json::from_str(text).unwrap();
        match msg {
            WireMessage::PriceUpdate(payload) => {
                assert_eq!(payload.symbol, "BTCUSDT");
                assert_eq!(payload.price, dec!(50123.45));
                assert_eq!(payload.change_24h_pct, dec!(-2.1));
                assert_eq!(payload.updated_at, 1_700_000_000_000);
            }
            other => panic!("expected price update, got {other:?}"),
        }
    }

    #[test]
    fn test_price_update_accepts_string_numbers() {
        let text = r#"{"type":"price_update","payload":{"symbol":"ETHUSDT","price":"3000.5","change24hPct":"0.4","volume24h":"99","updatedAt":1700000000000}}"#;
        let msg: WireMessage = serde_json::from_str(text).unwrap();
        match msg {
            WireMessage::PriceUpdate(payload) => assert_eq!(payload.price, dec!(3000.5)),
            other => panic!("expected price update, got {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_conversion_uses_server_time() {
        let payload = PriceUpdatePayload {
            symbol: "BTCUSDT".to_string(),
            price: dec!(50000),
            change_24h_pct: dec!(1.0),
            volume_24h: dec!(10),
            updated_at: 1_700_000_000_000,
        };
        let snapshot = payload.into_snapshot();
        assert_eq!(snapshot.timestamp.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(snapshot.change24h, dec!(1.0));
    }

    #[test]
    fn test_malformed_frames_do_not_parse() {
        assert!(serde_json::from_str::<WireMessage>("not json").is_err());
        assert!(serde_json::from_str::<WireMessage>(r#"{"type":"mystery"}"#).is_err());
        assert!(serde_json::from_str::<WireMessage>(r#"{"payload":{}}"#).is_err());
    }
}
