//! Snapshot record types shared across the resilience layer.
//!
//! These are the shapes stored in the durable local store and cached in
//! memory: one price snapshot per instrument (last-write-wins, no history),
//! watchlist entries, alerts, the searchable coin list, and the market
//! overview.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest known quote for a single instrument.
///
/// Exactly one snapshot exists per symbol; newer updates overwrite older
/// ones unconditionally. Price history is never retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// Instrument symbol (e.g. "BTCUSDT").
    pub symbol: String,
    /// Last traded price.
    pub price: Decimal,
    /// 24-hour change in percent (may be negative).
    pub change24h: Decimal,
    /// 24-hour traded volume.
    pub volume24h: Decimal,
    /// When the feed produced this snapshot.
    pub timestamp: DateTime<Utc>,
}

impl PriceSnapshot {
    /// Age of this snapshot in milliseconds.
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.timestamp).num_milliseconds()
    }
}

/// One entry of the user's watchlist snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    /// Instrument symbol.
    pub symbol: String,
    /// When the symbol was added.
    pub added_at: DateTime<Utc>,
}

impl WatchlistEntry {
    /// Create an entry timestamped now.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            added_at: Utc::now(),
        }
    }
}

/// Direction of an alert threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    /// Fire when the price rises above the threshold.
    Above,
    /// Fire when the price falls below the threshold.
    Below,
}

impl std::fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Above => write!(f, "above"),
            Self::Below => write!(f, "below"),
        }
    }
}

/// Creation form for an alert; the server assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSpec {
    /// Instrument symbol the alert watches.
    pub symbol: String,
    /// Threshold direction.
    pub condition: AlertCondition,
    /// Price threshold.
    pub threshold: Decimal,
}

/// A server-confirmed price alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Server-assigned alert id.
    pub id: String,
    /// Instrument symbol the alert watches.
    pub symbol: String,
    /// Threshold direction.
    pub condition: AlertCondition,
    /// Price threshold.
    pub threshold: Decimal,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Build an alert from its creation spec and a server-assigned id.
    pub fn from_spec(id: impl Into<String>, spec: &AlertSpec) -> Self {
        Self {
            id: id.into(),
            symbol: spec.symbol.clone(),
            condition: spec.condition,
            threshold: spec.threshold,
            created_at: Utc::now(),
        }
    }
}

/// One entry of the searchable instrument list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// Instrument symbol, unique key.
    pub symbol: String,
    /// Human-readable name, secondary search key.
    pub name: String,
    /// Market-cap rank, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
}

/// Aggregate market statistics, stored under the `"overview"` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketOverview {
    /// Total market capitalization.
    pub total_market_cap: Decimal,
    /// Total 24-hour volume.
    pub total_volume_24h: Decimal,
    /// Bitcoin dominance in percent.
    pub btc_dominance: Decimal,
    /// When the overview was produced.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_snapshot_age_is_fresh() {
        let snap = PriceSnapshot {
            symbol: "BTCUSDT".to_string(),
            price: dec!(43250.5),
            change24h: dec!(-1.2),
            volume24h: dec!(1234567),
            timestamp: Utc::now(),
        };
        assert!(snap.age_ms() < 1000);
    }

    #[test]
    fn test_alert_from_spec_copies_fields() {
        let spec = AlertSpec {
            symbol: "ETHUSDT".to_string(),
            condition: AlertCondition::Above,
            threshold: dec!(4000),
        };
        let alert = Alert::from_spec("a-1", &spec);
        assert_eq!(alert.id, "a-1");
        assert_eq!(alert.symbol, "ETHUSDT");
        assert_eq!(alert.condition, AlertCondition::Above);
        assert_eq!(alert.threshold, dec!(4000));
    }

    #[test]
    fn test_alert_condition_serializes_lowercase() {
        let json = serde_json::to_string(&AlertCondition::Below).unwrap();
        assert_eq!(json, "\"below\"");
    }

    #[test]
    fn test_coin_rank_omitted_when_absent() {
        let coin = Coin {
            symbol: "SOL".to_string(),
            name: "Solana".to_string(),
            rank: None,
        };
        let json = serde_json::to_string(&coin).unwrap();
        assert!(!json.contains("rank"));
    }
}
