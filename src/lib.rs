//! Resilient request cache layer.
//!
//! Decides, per request, whether to answer from the network, from a versioned
//! local store, or from a degraded fallback, and guarantees the caller always
//! gets a well-formed response back.
//!
//! ```no_run
//! # async fn demo() -> color_eyre::Result<()> {
//! use std::sync::Arc;
//! use rrcl::{Config, HttpTransport, Lifecycle, RequestDescriptor, SqliteStore};
//!
//! let config = Arc::new(Config::load(None)?);
//! let store = Arc::new(SqliteStore::open_default()?);
//! let mut lifecycle = Lifecycle::new(Arc::clone(&config), store);
//! lifecycle.activate()?;
//!
//! let router = lifecycle.router(Arc::new(HttpTransport::new(&config.network)?))?;
//! let resolved = router.route(&RequestDescriptor::get("/api/stations")).await;
//! println!("{} via {:?}", resolved.status(), resolved.source);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fallback;
pub mod lifecycle;
pub mod request;
pub mod response;
pub mod router;
pub mod stats;
pub mod strategy;
pub mod transport;
pub mod validator;

#[cfg(test)]
mod testing;

pub use cache::{CacheStore, MemoryStore, Partition, SqliteStore, StoredEntry};
pub use config::{Config, StrategyConfig};
pub use error::{ConfigError, FetchError, InvalidResponse, LifecycleError, StoreError};
pub use fallback::FallbackChain;
pub use lifecycle::{ActivationReport, Lifecycle, LifecycleState};
pub use request::{Headers, RequestDescriptor, ResourceClass};
pub use response::{ResolvedResponse, Response, ResponseSource};
pub use router::Router;
pub use stats::StatsSnapshot;
pub use strategy::{StrategyKind, StrategyPlan};
pub use transport::{HttpTransport, Transport};
