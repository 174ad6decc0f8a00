//! Offline mutation queue and replay coordination.
//!
//! Mutating user actions taken while offline are appended to a durable
//! queue and replayed against the API, strictly in enqueue order, when
//! connectivity returns. Enqueueing only touches local storage, so it
//! never fails for network reasons; replay is at-least-once and keeps
//! failed items queued for the next drain.

pub mod api;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod queue;

pub use api::{ApiClient, ApiError, ApiResult, BoxFuture, DynApiClient, MockApiClient};
pub use connectivity::ConnectivityMonitor;
pub use coordinator::{DrainReport, SyncCoordinator};
pub use error::{SyncError, SyncResult};
pub use queue::MutationQueue;
