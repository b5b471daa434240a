//! Aerolens - Aerospike node exporter
//!
//! This crate observes a single database node over its info protocol and
//! republishes what it reports as Prometheus metrics. It can be used as a
//! library, or run as a standalone binary with the `aerolens` executable.
//!
//! # Architecture
//!
//! - **Session**: one optionally TLS-secured, authenticated connection to the node
//! - **Info client**: batched key requests and `ERROR:` reply classification
//! - **Watchers**: per metric family extractors run in a fixed order
//! - **Observer**: the two-round collection cycle and node liveness reporting
//! - **Server**: HTTP exposition of each cycle's samples
//!
//! # Example
//!
//! ```rust,ignore
//! use aerolens::{AppConfig, ConnectionPolicy, NodeConnector, Observer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load("configs/config.yaml")?;
//!     let policy = ConnectionPolicy::from_config(&config.aerospike)?;
//!     let observer = Observer::new(NodeConnector::new(policy))?;
//!
//!     let sink = observer.collect().await;
//!     println!("{}", sink.encode_text()?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod info;
pub mod metrics;
pub mod observer;
pub mod server;
pub mod session;
pub mod watcher;

pub use config::{AppConfig, ConfigError};
pub use error::ObserveError;
pub use info::request_info;
pub use metrics::{Emission, MetricKind, MetricSink, SinkError};
pub use observer::{CyclePhase, NodeIdentity, Observer, RefreshFailure, Scrape};
pub use session::{
    AuthMode, ConnectionError, ConnectionPolicy, InfoConnection, NodeConnector, RawMetrics,
    Session, SessionProvider,
};
pub use watcher::{
    Accumulator, LatencyWatcher, NamespaceWatcher, RefreshError, SetWatcher, StatsWatcher,
    Watcher,
};
