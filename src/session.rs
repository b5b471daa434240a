//! Session Layer
//!
//! One authenticated, optionally TLS-secured connection to the observed node.
//!
//! # Components
//!
//! - [`Session`]: a live connection able to answer batched info requests
//! - [`SessionProvider`]: builds a fresh [`Session`] on demand
//! - [`ConnectionPolicy`]: immutable connection settings derived once at startup
//! - [`NodeConnector`] / [`InfoConnection`]: TCP/TLS implementation of the above

mod codec;
mod connection;
mod policy;
pub mod tls;

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

pub use codec::{LOGIN_SUCCESS, MAX_BODY_SIZE, SECURITY_NOT_ENABLED};
pub use connection::{InfoConnection, MAX_IDLE, NodeConnector};
pub use policy::{AuthMode, ConnectionPolicy, MAX_CONNECTIONS};

/// Raw key/value answer of one info request.
pub type RawMetrics = HashMap<String, String>;

/// Errors raised while building or using a session.
///
/// All of these are recoverable: the cycle reports the node as down and the
/// next scrape starts over with a fresh session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Network I/O error.
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout elapsed.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation that did not finish in time.
        operation: &'static str,
        /// Configured bound.
        timeout: Duration,
    },

    /// The connection limit is already used by a live session.
    #[error("connection limit of {0} reached")]
    Busy(usize),

    /// The configured TLS name is not a valid server name.
    #[error("invalid tls name '{0}'")]
    InvalidServerName(String),

    /// The node rejected the login.
    #[error("login failed with result code {0}")]
    Login(u8),

    /// The node answered with an unexpected frame.
    #[error("protocol framing error: {0}")]
    Framing(String),

    /// The session was used after being marked broken.
    #[error("session is closed")]
    Closed,
}

/// A connection to the observed node.
#[async_trait::async_trait]
pub trait Session: Send {
    /// Whether the session may still be used for requests.
    fn is_connected(&self) -> bool;

    /// Send `keys` as one batch and return every name/value pair the node answered.
    async fn request_info(&mut self, keys: &[String]) -> Result<RawMetrics, ConnectionError>;
}

/// Builds sessions to the observed node.
#[async_trait::async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    /// Session type produced by this provider.
    type Session: Session + 'static;

    /// Open, and if required authenticate, a new session.
    async fn connect(&self) -> Result<Self::Session, ConnectionError>;
}
