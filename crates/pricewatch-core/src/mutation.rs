//! Pending-mutation model.
//!
//! A `Mutation` is one mutating user action (watchlist or alert change)
//! recorded while the device is offline. The durable store assigns each
//! queued mutation a monotonically increasing id; a record is removed
//! only after the replay of that exact id succeeds against the server.
//! Records are never mutated in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::AlertSpec;

/// A mutating user action, serialized as `{"kind": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum Mutation {
    /// Create a price alert.
    CreateAlert(AlertSpec),
    /// Delete the alert with the given server id.
    DeleteAlert {
        /// Server-assigned alert id.
        id: String,
    },
    /// Add a symbol to the watchlist.
    AddWatchlist {
        /// Instrument symbol.
        symbol: String,
    },
    /// Remove a symbol from the watchlist.
    RemoveWatchlist {
        /// Instrument symbol.
        symbol: String,
    },
}

impl Mutation {
    /// Discriminant of this mutation, used for dispatch and metrics labels.
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::CreateAlert(_) => MutationKind::CreateAlert,
            Self::DeleteAlert { .. } => MutationKind::DeleteAlert,
            Self::AddWatchlist { .. } => MutationKind::AddWatchlist,
            Self::RemoveWatchlist { .. } => MutationKind::RemoveWatchlist,
        }
    }
}

/// Mutation discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    CreateAlert,
    DeleteAlert,
    AddWatchlist,
    RemoveWatchlist,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateAlert => write!(f, "create-alert"),
            Self::DeleteAlert => write!(f, "delete-alert"),
            Self::AddWatchlist => write!(f, "add-watchlist"),
            Self::RemoveWatchlist => write!(f, "remove-watchlist"),
        }
    }
}

/// A durably queued mutation awaiting replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMutation {
    /// Store-assigned id, monotonically increasing, never reused.
    pub id: i64,
    /// The recorded action.
    pub mutation: Mutation,
    /// When the action was queued.
    pub enqueued_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlertCondition;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_add_watchlist_wire_shape() {
        let m = Mutation::AddWatchlist {
            symbol: "SOL".to_string(),
        };
        let value = serde_json::to_value(&m).unwrap();
        assert_eq!(
            value,
            json!({"kind": "add-watchlist", "payload": {"symbol": "SOL"}})
        );
    }

    #[test]
    fn test_create_alert_wire_shape() {
        let m = Mutation::CreateAlert(AlertSpec {
            symbol: "BTCUSDT".to_string(),
            condition: AlertCondition::Above,
            threshold: dec!(50000),
        });
        let value = serde_json::to_value(&m).unwrap();
        assert_eq!(value["kind"], "create-alert");
        assert_eq!(value["payload"]["symbol"], "BTCUSDT");
        assert_eq!(value["payload"]["condition"], "above");
    }

    #[test]
    fn test_mutation_round_trip() {
        let m = Mutation::DeleteAlert {
            id: "a-42".to_string(),
        };
        let text = serde_json::to_string(&m).unwrap();
        let back: Mutation = serde_json::from_str(&text).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(
            Mutation::AddWatchlist {
                symbol: "X".to_string()
            }
            .kind()
            .to_string(),
            "add-watchlist"
        );
        assert_eq!(
            Mutation::DeleteAlert {
                id: "1".to_string()
            }
            .kind()
            .to_string(),
            "delete-alert"
        );
    }
}
