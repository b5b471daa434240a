//! Metric sink backed by a per-scrape `prometheus` registry.
//!
//! Watchers push [`Emission`]s; the sink materialises them as gauge or counter
//! vectors keyed by metric name and renders the text exposition format.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use prometheus::core::Collector;
use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Errors raised while recording an emission.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Metric name reused with a different label set.
    #[error("metric '{name}' uses labels {expected:?}, got {got:?}")]
    LabelMismatch {
        name: String,
        expected: Vec<String>,
        got: Vec<String>,
    },

    /// Metric name reused with a different kind.
    #[error("metric '{name}' is a {expected}, got a {got}")]
    KindMismatch {
        name: String,
        expected: MetricKind,
        got: MetricKind,
    },

    /// Counters only go up.
    #[error("counter '{name}' cannot take negative value {value}")]
    NegativeCounter { name: String, value: f64 },

    /// Error from the underlying registry.
    #[error("registry error: {0}")]
    Registry(#[from] prometheus::Error),
}

/// Kind of a metric sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gauge => write!(f, "gauge"),
            Self::Counter => write!(f, "counter"),
        }
    }
}

/// One typed sample produced by a watcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub value: f64,
    /// Label pairs in declaration order.
    pub labels: Vec<(String, String)>,
}

impl Emission {
    /// Create a gauge sample.
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::new(name.into(), MetricKind::Gauge, value)
    }

    /// Create a counter sample.
    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self::new(name.into(), MetricKind::Counter, value)
    }

    fn new(name: String, kind: MetricKind, value: f64) -> Self {
        Self {
            help: name.clone(),
            name,
            kind,
            value,
            labels: Vec::new(),
        }
    }

    /// Set the help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    /// Append a label.
    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((name.into(), value.into()));
        self
    }

    /// Get a label value by name.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

enum Family {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

impl Family {
    fn kind(&self) -> MetricKind {
        match self {
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Counter(_) => MetricKind::Counter,
        }
    }
}

/// Receives the samples of one scrape.
pub struct MetricSink {
    registry: Registry,
    families: HashMap<String, (Vec<String>, Family)>,
    samples: Vec<Emission>,
}

impl Default for MetricSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSink {
    /// Create an empty sink with its own registry.
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            families: HashMap::new(),
            samples: Vec::new(),
        }
    }

    /// Record one sample.
    ///
    /// Re-emitting the same series overwrites its value.
    ///
    /// # Errors
    /// Returns `SinkError` on label or kind conflicts, negative counters and
    /// names the registry refuses.
    pub fn emit(&mut self, emission: Emission) -> Result<(), SinkError> {
        if emission.kind == MetricKind::Counter && emission.value < 0.0 {
            return Err(SinkError::NegativeCounter {
                name: emission.name,
                value: emission.value,
            });
        }

        let label_names: Vec<String> = emission.labels.iter().map(|(k, _)| k.clone()).collect();

        let (expected, family) = match self.families.entry(emission.name.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let names: Vec<&str> = label_names.iter().map(String::as_str).collect();
                let opts = Opts::new(emission.name.as_str(), emission.help.as_str());
                let family = match emission.kind {
                    MetricKind::Gauge => {
                        let vec = GaugeVec::new(opts, &names)?;
                        self.registry.register(Box::new(vec.clone()))?;
                        Family::Gauge(vec)
                    }
                    MetricKind::Counter => {
                        let vec = CounterVec::new(opts, &names)?;
                        self.registry.register(Box::new(vec.clone()))?;
                        Family::Counter(vec)
                    }
                };
                entry.insert((label_names.clone(), family))
            }
        };

        if *expected != label_names {
            return Err(SinkError::LabelMismatch {
                name: emission.name,
                expected: expected.clone(),
                got: label_names,
            });
        }
        if family.kind() != emission.kind {
            return Err(SinkError::KindMismatch {
                name: emission.name,
                expected: family.kind(),
                got: emission.kind,
            });
        }

        let values: Vec<&str> = emission.labels.iter().map(|(_, v)| v.as_str()).collect();
        match family {
            Family::Gauge(vec) => vec.get_metric_with_label_values(&values)?.set(emission.value),
            Family::Counter(vec) => {
                let counter = vec.get_metric_with_label_values(&values)?;
                counter.reset();
                counter.inc_by(emission.value);
            }
        }

        self.samples.push(emission);
        Ok(())
    }

    /// Register a collector that lives outside this scrape, such as a process-wide counter.
    pub fn register(&self, collector: Box<dyn Collector>) -> Result<(), SinkError> {
        self.registry.register(collector)?;
        Ok(())
    }

    /// Samples recorded through [`emit`](Self::emit), in emission order.
    pub fn samples(&self) -> &[Emission] {
        &self.samples
    }

    /// Find the last recorded sample with the given name and labels.
    pub fn find(&self, name: &str, labels: &[(&str, &str)]) -> Option<&Emission> {
        self.samples.iter().rev().find(|s| {
            s.name == name && labels.iter().all(|(k, v)| s.label(k) == Some(*v))
        })
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode_text(&self) -> Result<String, SinkError> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl std::fmt::Debug for MetricSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSink")
            .field("families", &self.families.len())
            .field("samples", &self.samples.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::IntCounter;

    #[test]
    fn test_gauge_rendered_with_labels() {
        let mut sink = MetricSink::new();
        sink.emit(
            Emission::gauge("aerospike_namespace_objects", 42.0)
                .with_help("Objects in namespace")
                .with_label("ns", "test"),
        )
        .unwrap();

        let text = sink.encode_text().unwrap();
        assert!(text.contains("# HELP aerospike_namespace_objects Objects in namespace"));
        assert!(text.contains("# TYPE aerospike_namespace_objects gauge"));
        assert!(text.contains("aerospike_namespace_objects{ns=\"test\"} 42"));
    }

    #[test]
    fn test_counter_takes_absolute_value() {
        let mut sink = MetricSink::new();
        sink.emit(Emission::counter("aerospike_node_stats_reads_total", 10.0))
            .unwrap();
        sink.emit(Emission::counter("aerospike_node_stats_reads_total", 7.0))
            .unwrap();

        let text = sink.encode_text().unwrap();
        assert!(text.contains("# TYPE aerospike_node_stats_reads_total counter"));
        assert!(text.contains("aerospike_node_stats_reads_total 7"));
        assert_eq!(sink.samples().len(), 2);
    }

    #[test]
    fn test_negative_counter_rejected() {
        let mut sink = MetricSink::new();
        let err = sink.emit(Emission::counter("c_total", -1.0)).unwrap_err();
        assert!(matches!(err, SinkError::NegativeCounter { .. }));
        assert!(sink.samples().is_empty());
    }

    #[test]
    fn test_label_mismatch_rejected() {
        let mut sink = MetricSink::new();
        sink.emit(Emission::gauge("g", 1.0).with_label("ns", "a")).unwrap();

        let err = sink
            .emit(Emission::gauge("g", 1.0).with_label("set", "b"))
            .unwrap_err();
        assert!(matches!(err, SinkError::LabelMismatch { .. }));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let mut sink = MetricSink::new();
        sink.emit(Emission::gauge("m", 1.0)).unwrap();
        let err = sink.emit(Emission::counter("m", 1.0)).unwrap_err();
        assert!(err.to_string().contains("is a gauge"));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let mut sink = MetricSink::new();
        assert!(matches!(
            sink.emit(Emission::gauge("bad-name", 1.0)),
            Err(SinkError::Registry(_))
        ));
    }

    #[test]
    fn test_external_collector_is_rendered() {
        let ticks = IntCounter::new("aerospike_node_ticks", "Scrape attempts").unwrap();
        ticks.inc();

        let sink = MetricSink::new();
        sink.register(Box::new(ticks.clone())).unwrap();
        assert!(sink.encode_text().unwrap().contains("aerospike_node_ticks 1"));
    }

    #[test]
    fn test_find_by_labels() {
        let mut sink = MetricSink::new();
        sink.emit(Emission::gauge("g", 1.0).with_label("ns", "a")).unwrap();
        sink.emit(Emission::gauge("g", 2.0).with_label("ns", "b")).unwrap();

        assert_eq!(sink.find("g", &[("ns", "b")]).unwrap().value, 2.0);
        assert!(sink.find("g", &[("ns", "c")]).is_none());
    }
}
