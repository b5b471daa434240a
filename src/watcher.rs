//! Watchers
//!
//! A watcher turns the raw text of one metric family into typed samples.
//!
//! # Contract
//!
//! - [`Watcher::info_keys`]: keys needed in the first round
//! - [`Watcher::detail_keys`]: keys for the second round, derived from first-round data
//! - [`Watcher::refresh`]: parses second-round data and emits samples
//!
//! Watchers run in a fixed order and share an [`Accumulator`] so that later
//! watchers can read what earlier ones computed.

mod latency;
mod namespace;
mod set;
mod stats;

use std::collections::HashMap;

use thiserror::Error;

use crate::metrics::{Emission, MetricSink, SinkError};
use crate::session::RawMetrics;

pub use latency::LatencyWatcher;
pub use namespace::NamespaceWatcher;
pub use set::SetWatcher;
pub use stats::StatsWatcher;

/// Accumulator key holding the namespace names seen this cycle.
pub const NAMESPACES: &str = "namespaces";

/// Accumulator key holding the object count summed over namespaces.
pub const NAMESPACE_OBJECTS: &str = "namespace_objects";

/// Round-two identity keys requested ahead of every watcher key.
pub const IDENTITY_KEYS: [&str; 3] = ["cluster-name", "service", "build"];

/// Errors raised by a watcher while refreshing.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The node answered with text the watcher cannot parse.
    #[error("{watcher}: malformed '{key}' response: {detail}")]
    Malformed {
        watcher: &'static str,
        key: String,
        detail: String,
    },

    /// A sample was rejected by the sink.
    #[error("{0}")]
    Sink(#[from] SinkError),
}

impl RefreshError {
    pub(crate) fn malformed(watcher: &'static str, key: &str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            watcher,
            key: key.to_string(),
            detail: detail.into(),
        }
    }
}

/// Extractor for one metric family.
pub trait Watcher: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Keys wanted in round one; may be empty.
    fn info_keys(&self) -> Vec<String>;

    /// Keys wanted in round two, computed from round-one data; may be empty.
    fn detail_keys(&self, round_one: &RawMetrics) -> Vec<String>;

    /// Parse this watcher's entries of `round_two` and push samples to `sink`.
    ///
    /// `my_keys` are the keys this watcher returned from [`detail_keys`](Self::detail_keys).
    fn refresh(
        &self,
        my_keys: &[String],
        round_two: &RawMetrics,
        accumulator: &mut Accumulator,
        sink: &mut MetricSink,
    ) -> Result<(), RefreshError>;
}

/// The default watcher list, in execution order.
pub fn default_watchers() -> Vec<Box<dyn Watcher>> {
    vec![
        Box::new(NamespaceWatcher),
        Box::new(SetWatcher),
        Box::new(LatencyWatcher),
        Box::new(StatsWatcher),
    ]
}

/// Per-cycle scratch space shared by the watchers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accumulator {
    numbers: HashMap<String, f64>,
    names: HashMap<String, Vec<String>>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.numbers.get(key).copied()
    }

    pub fn set_number(&mut self, key: &str, value: f64) {
        self.numbers.insert(key.to_string(), value);
    }

    /// Add `delta` to a number, starting from zero.
    pub fn add_number(&mut self, key: &str, delta: f64) {
        *self.numbers.entry(key.to_string()).or_insert(0.0) += delta;
    }

    pub fn names(&self, key: &str) -> &[String] {
        self.names.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn push_name(&mut self, key: &str, name: impl Into<String>) {
        self.names.entry(key.to_string()).or_default().push(name.into());
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty() && self.names.is_empty()
    }
}

/// Labels attached to every watcher sample.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeLabels {
    pub cluster_name: String,
    pub service: String,
}

impl NodeLabels {
    /// Read the identity keys from a round-two response.
    pub fn from_raw(raw: &RawMetrics) -> Self {
        let get = |key: &str| raw.get(key).cloned().unwrap_or_default();
        Self {
            cluster_name: get("cluster-name"),
            service: get("service"),
        }
    }

    /// Start a sample carrying the node labels.
    pub fn gauge(&self, name: impl Into<String>, value: f64) -> Emission {
        self.apply(Emission::gauge(name, value))
    }

    /// Start a counter sample carrying the node labels.
    pub fn counter(&self, name: impl Into<String>, value: f64) -> Emission {
        self.apply(Emission::counter(name, value))
    }

    fn apply(&self, emission: Emission) -> Emission {
        emission
            .with_label("cluster_name", &self.cluster_name)
            .with_label("service", &self.service)
    }
}

// ============================================================================
// Parsing helpers
// ============================================================================

/// Split a `k=v<sep>k=v` list; empty entries are ignored.
///
/// Returns the offending entry when one has no `=`.
pub(crate) fn parse_pairs(payload: &str, sep: char) -> Result<Vec<(&str, &str)>, String> {
    payload
        .split(sep)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .split_once('=')
                .ok_or_else(|| format!("entry '{entry}' is not a key=value pair"))
        })
        .collect()
}

/// Parse a stat value: numbers as-is, `true`/`false` as 1/0, anything else skipped.
pub(crate) fn parse_value(raw: &str) -> Option<f64> {
    match raw.trim() {
        "true" => Some(1.0),
        "false" => Some(0.0),
        other => other.parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

/// Turn a stat name into a valid metric name fragment.
pub(crate) fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn raw(pairs: &[(&str, &str)]) -> RawMetrics {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    pub fn identity() -> Vec<(&'static str, &'static str)> {
        vec![
            ("cluster-name", "prod"),
            ("service", "10.0.0.1:3000"),
            ("build", "7.0.0.1"),
        ]
    }

    pub fn with_identity(pairs: &[(&str, &str)]) -> RawMetrics {
        let mut map = raw(&identity());
        map.extend(raw(pairs));
        map
    }
}
