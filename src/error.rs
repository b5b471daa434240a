//! Cycle-level error type.
//!
//! Every variant is recoverable: a failed cycle reports the node as down and
//! the next scrape starts over.

use thiserror::Error;

use crate::session::ConnectionError;
use crate::watcher::RefreshError;

/// Errors that abort one collection cycle.
#[derive(Debug, Error)]
pub enum ObserveError {
    /// Session build, login or transport failure.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// The node answered with an `ERROR:` pseudo-key.
    #[error("{0}")]
    Protocol(String),

    /// A watcher could not parse its data.
    #[error("refresh error: {0}")]
    Refresh(#[from] RefreshError),
}
