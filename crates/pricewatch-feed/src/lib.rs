//! Live price state.
//!
//! Holds the most recent snapshot per symbol and fans out every accepted
//! update to subscribers.

pub mod cache;

pub use cache::PriceCache;
