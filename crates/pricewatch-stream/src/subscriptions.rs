//! Desired-subscription tracking.
//!
//! The set records what the consumer wants streamed, independent of
//! connection state. Mutations report the effective delta so the client
//! can send minimal subscribe/unsubscribe frames, and the full set is
//! replayed whenever a connection opens.

use parking_lot::RwLock;
use std::collections::BTreeSet;

/// Set of symbols the consumer wants live updates for.
///
/// Backed by a `BTreeSet` so replayed subscribe frames list symbols in a
/// stable order.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    symbols: RwLock<BTreeSet<String>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add symbols. Returns the ones that were not already present,
    /// sorted; an empty return means nothing needs to go on the wire.
    pub fn add_all<S: Into<String>>(&self, symbols: impl IntoIterator<Item = S>) -> Vec<String> {
        let mut set = self.symbols.write();
        let mut added = Vec::new();
        for symbol in symbols {
            let symbol = symbol.into();
            if set.insert(symbol.clone()) {
                added.push(symbol);
            }
        }
        added.sort();
        added
    }

    /// Remove symbols. Returns the ones that were actually present,
    /// sorted.
    pub fn remove_all<S: AsRef<str>>(&self, symbols: impl IntoIterator<Item = S>) -> Vec<String> {
        let mut set = self.symbols.write();
        let mut removed = Vec::new();
        for symbol in symbols {
            let symbol = symbol.as_ref();
            if set.remove(symbol) {
                removed.push(symbol.to_string());
            }
        }
        removed.sort();
        removed
    }

    /// Current desired set, sorted.
    pub fn symbols(&self) -> Vec<String> {
        self.symbols.read().iter().cloned().collect()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.read().contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_reports_only_new_symbols() {
        let set = SubscriptionSet::new();
        let added = set.add_all(["ETHUSDT", "BTCUSDT"]);
        assert_eq!(added, vec!["BTCUSDT", "ETHUSDT"]);

        let added = set.add_all(["BTCUSDT", "SOLUSDT"]);
        assert_eq!(added, vec!["SOLUSDT"]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_remove_reports_only_present_symbols() {
        let set = SubscriptionSet::new();
        set.add_all(["BTCUSDT", "ETHUSDT"]);

        let removed = set.remove_all(["ETHUSDT", "DOGEUSDT"]);
        assert_eq!(removed, vec!["ETHUSDT"]);
        assert_eq!(set.symbols(), vec!["BTCUSDT"]);
    }

    #[test]
    fn test_symbols_are_sorted() {
        let set = SubscriptionSet::new();
        set.add_all(["SOLUSDT", "BTCUSDT", "ETHUSDT"]);
        assert_eq!(set.symbols(), vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
    }
}
