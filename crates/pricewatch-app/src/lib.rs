//! Application crate: configuration, wiring, and the user-facing
//! action layer that ties the stream, store, sync queue, and cache
//! proxy together.

pub mod actions;
pub mod app;
pub mod config;
pub mod error;
pub mod http_api;

pub use actions::{ActionOutcome, UserActions};
pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use http_api::HttpApiClient;
