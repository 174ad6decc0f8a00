//! Durable local store for pricewatch.
//!
//! A transactional, asynchronous key-value persistence layer partitioned
//! into named record collections:
//! - `watchlist`, `alerts`, `market`: keyed JSON records
//! - `coins`: keyed JSON records with a secondary index on the coin name
//! - `pending-mutations`: auto-incrementing durable mutation log
//!
//! Pure storage; no business logic. Backed by SQLite via sqlx. When the
//! on-disk database cannot be opened the store falls back to an in-memory
//! database so the rest of the application keeps functioning in a
//! degraded, non-durable mode.

pub mod error;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::{Collection, LocalStore};
