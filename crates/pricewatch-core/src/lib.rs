//! Core domain types for the pricewatch resilience layer.
//!
//! This crate provides the fundamental types shared by every component:
//! - `PriceSnapshot`: latest known quote for one instrument
//! - `WatchlistEntry`, `Alert`, `Coin`, `MarketOverview`: snapshot records
//! - `Mutation` / `PendingMutation`: durably queued user actions

pub mod error;
pub mod mutation;
pub mod types;

pub use error::{CoreError, Result};
pub use mutation::{Mutation, MutationKind, PendingMutation};
pub use types::{
    Alert, AlertCondition, AlertSpec, Coin, MarketOverview, PriceSnapshot, WatchlistEntry,
};
