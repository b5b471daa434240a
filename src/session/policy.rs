//! Connection policy derived once from configuration.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use rustls::ClientConfig;

use crate::config::{AerospikeConfig, ConfigError, DEFAULT_TIMEOUT};

use super::tls::build_client_config;

/// The exporter polls one node, one cycle at a time: never more than one connection.
pub const MAX_CONNECTIONS: usize = 1;

/// Salt the node expects credentials to be hashed with.
const CREDENTIAL_SALT: &str = "7EqJtq98hPqEX7fNZaFWoO";

/// bcrypt cost matching [`CREDENTIAL_SALT`].
const CREDENTIAL_COST: u32 = 10;

const BCRYPT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::BCRYPT,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone)
        .with_decode_allow_trailing_bits(true),
);

/// How the node authenticates the configured user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    /// Users managed by the node itself.
    #[default]
    Internal,
    /// Users managed by an external directory; the clear password is sent too.
    External,
}

impl FromStr for AuthMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "internal" => Ok(Self::Internal),
            "external" => Ok(Self::External),
            _ => Err(ConfigError::ValidationError(format!(
                "invalid auth mode '{}': only `internal` and `external` values are accepted",
                s
            ))),
        }
    }
}

impl AuthMode {
    /// Get the mode name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
        }
    }
}

/// Immutable connection settings shared by every session.
#[derive(Clone)]
pub struct ConnectionPolicy {
    /// Node host name or IP address.
    pub host: String,
    /// Node service port.
    pub port: u16,
    /// Name the node certificate is verified against.
    pub tls_name: String,
    /// User name, empty when authentication is disabled.
    pub user: String,
    /// Authentication mode.
    pub auth_mode: AuthMode,
    /// Bound for every network operation.
    pub timeout: Duration,
    /// TLS client configuration, `None` for plain TCP.
    pub tls: Option<Arc<ClientConfig>>,
    /// Maximum number of concurrent connections, always [`MAX_CONNECTIONS`].
    pub connection_queue_size: usize,
    credential: String,
    clear_password: String,
}

impl ConnectionPolicy {
    /// Create a plain, unauthenticated policy for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            tls_name: host.clone(),
            host,
            port,
            user: String::new(),
            auth_mode: AuthMode::Internal,
            timeout: DEFAULT_TIMEOUT,
            tls: None,
            connection_queue_size: MAX_CONNECTIONS,
            credential: String::new(),
            clear_password: String::new(),
        }
    }

    /// Build the policy from configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` for an unknown auth mode or unloadable TLS material.
    pub fn from_config(config: &AerospikeConfig) -> Result<Self, ConfigError> {
        let auth_mode: AuthMode = config.auth_mode.parse()?;

        let mut policy = Self::new(&config.host, config.port)
            .with_timeout(config.timeout)
            .with_credentials(&config.user, &config.password, auth_mode)?;

        if let Some(name) = &config.tls_name {
            policy.tls_name = name.clone();
        }

        if let Some(tls) = build_client_config(config)? {
            policy = policy.with_tls(Arc::new(tls));
        }

        tracing::info!(
            node = %policy.address(),
            auth_mode = auth_mode.as_str(),
            tls = policy.tls.is_some(),
            authenticated = policy.requires_authentication(),
            "Connection policy ready"
        );

        Ok(policy)
    }

    /// Set the per-operation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the TLS client configuration.
    pub fn with_tls(mut self, tls: Arc<ClientConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set credentials; the password is hashed immediately.
    ///
    /// An empty user disables authentication.
    pub fn with_credentials(
        mut self,
        user: &str,
        password: &str,
        auth_mode: AuthMode,
    ) -> Result<Self, ConfigError> {
        self.user = user.to_string();
        self.auth_mode = auth_mode;
        if self.user.is_empty() {
            self.credential.clear();
            self.clear_password.clear();
        } else {
            self.credential = hash_password(password)?;
            self.clear_password = match auth_mode {
                AuthMode::Internal => String::new(),
                AuthMode::External => password.to_string(),
            };
        }
        Ok(self)
    }

    /// Whether a login handshake must follow the connect.
    pub fn requires_authentication(&self) -> bool {
        !self.user.is_empty()
    }

    /// Node address as `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn credential(&self) -> &str {
        &self.credential
    }

    /// Clear password, only present in external mode.
    pub(crate) fn clear_password(&self) -> Option<&str> {
        match self.auth_mode {
            AuthMode::External if self.requires_authentication() => Some(&self.clear_password),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ConnectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPolicy")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls_name", &self.tls_name)
            .field("user", &self.user)
            .field("auth_mode", &self.auth_mode)
            .field("timeout", &self.timeout)
            .field("tls", &self.tls.is_some())
            .field("connection_queue_size", &self.connection_queue_size)
            .finish_non_exhaustive()
    }
}

/// Hash a password the way the node stores credentials.
fn hash_password(password: &str) -> Result<String, ConfigError> {
    let salt: [u8; 16] = BCRYPT_BASE64
        .decode(CREDENTIAL_SALT)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| ConfigError::ValidationError("invalid credential salt".to_string()))?;

    let parts = bcrypt::hash_with_salt(password, CREDENTIAL_COST, salt)
        .map_err(|e| ConfigError::ValidationError(format!("failed to hash password: {e}")))?;

    Ok(parts.format_for_version(bcrypt::Version::TwoA))
}
