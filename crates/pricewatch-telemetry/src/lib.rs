//! Observability for the resilience layer.
//!
//! Prometheus metrics for the stream, queue, and proxy, plus structured
//! logging setup shared by every binary.

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
