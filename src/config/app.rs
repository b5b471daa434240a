//! Application configuration structures.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::session::AuthMode;

use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default exporter port.
pub const DEFAULT_SERVER_PORT: u16 = 9145;

/// Default node service port.
pub const DEFAULT_NODE_PORT: u16 = 3000;

/// Default per-operation network timeout (5 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default path the metrics endpoint is served on.
pub const DEFAULT_METRICS_PATH: &str = "/metrics";

fn default_metrics_path() -> String {
    DEFAULT_METRICS_PATH.to_string()
}

fn default_node_host() -> String {
    "127.0.0.1".to_string()
}

fn default_node_port() -> u16 {
    DEFAULT_NODE_PORT
}

fn default_auth_mode() -> String {
    "internal".to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_log_level() -> String {
    "info".to_string()
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Exposition server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 9145).
    pub port: u16,

    /// Path serving the text exposition (default: "/metrics").
    pub metrics_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_SERVER_PORT,
            metrics_path: default_metrics_path(),
        }
    }
}

// =============================================================================
// Node Configuration
// =============================================================================

/// Target node, credentials and TLS material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AerospikeConfig {
    /// Node host name or IP address (default: "127.0.0.1").
    #[serde(default = "default_node_host")]
    pub host: String,

    /// Node service port (default: 3000).
    #[serde(default = "default_node_port")]
    pub port: u16,

    /// Name the node certificate is verified against (default: `host`).
    #[serde(default)]
    pub tls_name: Option<String>,

    /// User name; authentication is skipped when empty.
    #[serde(default)]
    pub user: String,

    /// Password, `${VAR}` references are expanded on load.
    #[serde(default)]
    pub password: String,

    /// `internal` or `external`, case-insensitive (default: "internal").
    #[serde(default = "default_auth_mode")]
    pub auth_mode: String,

    /// Bound for every network operation (default: 5s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Extra root CA appended to the system trust store.
    #[serde(default)]
    pub root_ca: Option<PathBuf>,

    /// Client certificate for mutual TLS.
    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    /// Private key matching `cert_file`.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

impl Default for AerospikeConfig {
    fn default() -> Self {
        Self {
            host: default_node_host(),
            port: DEFAULT_NODE_PORT,
            tls_name: None,
            user: String::new(),
            password: String::new(),
            auth_mode: default_auth_mode(),
            timeout: DEFAULT_TIMEOUT,
            root_ca: None,
            cert_file: None,
            key_file: None,
        }
    }
}

impl AerospikeConfig {
    /// Whether any TLS file is configured.
    pub fn tls_enabled(&self) -> bool {
        self.root_ca.is_some() || self.cert_file.is_some() || self.key_file.is_some()
    }

    /// Node address as `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Log Configuration
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// EnvFilter directive used when `RUST_LOG` is unset (default: "info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (default: text).
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Exposition server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Observed node configuration.
    #[serde(default)]
    pub aerospike: AerospikeConfig,

    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(content)?;
        config.aerospike.user = expand_env_vars(&config.aerospike.user);
        config.aerospike.password = expand_env_vars(&config.aerospike.password);
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server bind address
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        // Validate server port
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server port must be non-zero".to_string(),
            ));
        }

        if !self.server.metrics_path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "metrics path must start with '/': '{}'",
                self.server.metrics_path
            )));
        }

        if self.server.metrics_path == "/healthz" {
            return Err(ConfigError::ValidationError(
                "metrics path cannot be the health probe path '/healthz'".to_string(),
            ));
        }

        let node = &self.aerospike;
        if node.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "aerospike host cannot be empty".to_string(),
            ));
        }

        if node.port == 0 {
            return Err(ConfigError::ValidationError(
                "aerospike port must be non-zero".to_string(),
            ));
        }

        if node.timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "aerospike timeout must be positive".to_string(),
            ));
        }

        node.auth_mode.parse::<AuthMode>()?;

        if node.cert_file.is_some() != node.key_file.is_some() {
            return Err(ConfigError::ValidationError(
                "aerospike cert_file and key_file must be configured together".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, DEFAULT_SERVER_PORT);
        assert_eq!(config.metrics_path, "/metrics");
    }

    #[test]
    fn test_aerospike_config_default() {
        let config = AerospikeConfig::default();
        assert_eq!(config.address(), "127.0.0.1:3000");
        assert_eq!(config.auth_mode, "internal");
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert!(!config.tls_enabled());
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_port() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.aerospike.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_bind_address() {
        let mut config = AppConfig::default();
        config.server.bind = "not-an-ip".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("invalid server bind address")
        );
    }

    #[test]
    fn test_config_validation_metrics_path() {
        let mut config = AppConfig::default();
        config.server.metrics_path = "metrics".to_string();
        assert!(config.validate().is_err());

        config.server.metrics_path = "/healthz".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_auth_mode() {
        let mut config = AppConfig::default();
        config.aerospike.auth_mode = " INTERNAL ".to_string();
        assert!(config.validate().is_ok());

        config.aerospike.auth_mode = "oauth".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("auth mode"));
    }

    #[test]
    fn test_config_validation_half_client_pair() {
        let mut config = AppConfig::default();
        config.aerospike.cert_file = Some(PathBuf::from("client.pem"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cert_file and key_file"));
    }

    #[test]
    fn test_from_yaml_full() {
        let yaml = r#"
server:
  bind: 127.0.0.1
  port: 9200
aerospike:
  host: db-1.internal
  port: 4333
  tls_name: db-1
  user: monitor
  password: ${AEROLENS_MISSING_PASSWORD_VAR:-s3cret}
  auth_mode: External
  timeout: 2s
  root_ca: /etc/aerospike/ca.pem
log:
  level: debug
  format: json
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.port, 9200);
        assert_eq!(config.server.metrics_path, "/metrics");
        assert_eq!(config.aerospike.address(), "db-1.internal:4333");
        assert_eq!(config.aerospike.tls_name.as_deref(), Some("db-1"));
        assert_eq!(config.aerospike.password, "s3cret");
        assert_eq!(config.aerospike.timeout, Duration::from_secs(2));
        assert!(config.aerospike.tls_enabled());
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_from_yaml_empty_sections_use_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.server.port, DEFAULT_SERVER_PORT);
        assert_eq!(config.aerospike.port, DEFAULT_NODE_PORT);
        assert_eq!(config.log.format, LogFormat::Text);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "aerospike:\n  host: 10.0.0.7\n  timeout: 750ms").unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.aerospike.host, "10.0.0.7");
        assert_eq!(config.aerospike.timeout, Duration::from_millis(750));
    }

    #[test]
    fn test_load_missing_file() {
        let result = AppConfig::load("/nonexistent/aerolens.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }
}
