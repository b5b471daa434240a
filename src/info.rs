//! Info protocol client.

use crate::error::ObserveError;
use crate::session::{RawMetrics, Session};

const ERROR_PREFIX: &str = "ERROR:";

/// Send `keys` as one batch over `session`.
///
/// The node reports failures by answering with a single pseudo-key starting
/// with `ERROR:` (any case). Only that exact shape is an error; multi-entry
/// responses are returned whole, including keys that were not requested.
///
/// # Errors
/// Returns `ObserveError::Connection` on transport failure and
/// `ObserveError::Protocol` carrying the pseudo-key on a node error.
pub async fn request_info<S>(session: &mut S, keys: &[String]) -> Result<RawMetrics, ObserveError>
where
    S: Session + ?Sized,
{
    let raw = session.request_info(keys).await?;

    if let Some(key) = raw.keys().next().filter(|k| raw.len() == 1 && is_error_key(k)) {
        return Err(ObserveError::Protocol(key.clone()));
    }

    Ok(raw)
}

fn is_error_key(key: &str) -> bool {
    key.get(..ERROR_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(ERROR_PREFIX))
}
