//! Configuration module for the exporter.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (port, bind address, metrics path)
//! - Node settings (address, credentials, auth mode, timeout, TLS files)
//! - Log settings (filter directive, output format)

mod app;
mod validation;

pub use app::{AerospikeConfig, AppConfig, LogConfig, LogFormat, ServerConfig};
pub use validation::{ConfigError, expand_env_vars};

// Re-export constants
pub use app::{DEFAULT_METRICS_PATH, DEFAULT_NODE_PORT, DEFAULT_SERVER_PORT, DEFAULT_TIMEOUT};
