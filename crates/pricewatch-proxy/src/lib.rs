//! Network cache proxy.
//!
//! Intercepts outgoing requests and answers them per route class:
//! cache-first for installed static assets, stale-while-revalidate for
//! media, network-first with a bounded deadline for API reads, and a
//! navigation fallback chain that ends in a synthesized offline page.
//! Cache sets are versioned; activating a new version removes every set
//! of the old one before any new traffic is served.

pub mod cache;
pub mod error;
pub mod fetch;
pub mod proxy;
pub mod request;
pub mod routes;

pub use cache::{CacheSet, CacheStorage};
pub use error::{ProxyError, ProxyResult};
pub use fetch::{BoxFuture, DynFetcher, Fetcher, HttpFetcher, MockFetcher};
pub use proxy::{CacheProxy, ProxyConfig, ProxyControl};
pub use request::{CachedResponse, ProxyRequest, ProxyResponse, ResponseSource};
pub use routes::RouteClass;
