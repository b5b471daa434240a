//! Latency histograms.
//!
//! The `latency:` answer is a `;`-separated list of header/data pairs:
//!
//! ```text
//! {test}-read:10:17:37-GMT,ops/sec,>1ms,>8ms,>64ms;10:17:47,120.5,1.20,0.40,0.00;
//! error-no-data-yet-or-back-too-small;
//! ```
//!
//! Each header names the namespace and operation and lists the buckets; the
//! data row carries the throughput followed by the share of operations slower
//! than each bucket threshold.

use super::{Accumulator, NodeLabels, RefreshError, Watcher, parse_value, sanitize};
use crate::metrics::MetricSink;
use crate::session::RawMetrics;

const LATENCY_KEY: &str = "latency:";

/// Emits `aerospike_latencies_<op>_ops_sec{ns}` and
/// `aerospike_latencies_<op>_pct_over{ns,threshold}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyWatcher;

/// One parsed histogram.
#[derive(Debug, PartialEq)]
struct Histogram<'a> {
    namespace: &'a str,
    operation: &'a str,
    ops_per_sec: f64,
    buckets: Vec<(&'a str, f64)>,
}

impl LatencyWatcher {
    fn parse(payload: &str) -> Result<Vec<Histogram<'_>>, String> {
        let mut histograms = Vec::new();
        let mut tokens = payload.split(';').map(str::trim).filter(|t| !t.is_empty());

        while let Some(header) = tokens.next() {
            if header.starts_with("error-") {
                continue;
            }

            let data = tokens
                .next()
                .ok_or_else(|| format!("histogram '{header}' has no data row"))?;

            let (name, columns) = header
                .split_once(':')
                .ok_or_else(|| format!("histogram header '{header}' has no name"))?;
            let (namespace, operation) = split_name(name);

            let columns: Vec<&str> = columns.split(',').map(str::trim).collect();
            let values: Vec<&str> = data.split(',').map(str::trim).collect();

            if columns.len() < 2 {
                return Err(format!("histogram '{name}' has no ops/sec column"));
            }
            if columns.len() != values.len() {
                return Err(format!(
                    "histogram '{name}' has {} buckets but {} values",
                    columns.len() - 2,
                    values.len().saturating_sub(2)
                ));
            }

            let number = |raw: &str| {
                parse_value(raw).ok_or_else(|| format!("histogram '{name}' has non-numeric value '{raw}'"))
            };

            let ops_per_sec = number(values[1])?;
            let buckets = columns[2..]
                .iter()
                .zip(&values[2..])
                .map(|(&column, &raw)| Ok((column.trim_start_matches('>'), number(raw)?)))
                .collect::<Result<Vec<_>, String>>()?;

            histograms.push(Histogram {
                namespace,
                operation,
                ops_per_sec,
                buckets,
            });
        }

        Ok(histograms)
    }
}

/// Split `{ns}-op` into namespace and operation; names without a namespace keep it empty.
fn split_name(name: &str) -> (&str, &str) {
    name.strip_prefix('{')
        .and_then(|rest| rest.split_once("}-"))
        .unwrap_or(("", name))
}

impl Watcher for LatencyWatcher {
    fn name(&self) -> &'static str {
        "latency"
    }

    fn info_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn detail_keys(&self, _round_one: &RawMetrics) -> Vec<String> {
        vec![LATENCY_KEY.to_string()]
    }

    fn refresh(
        &self,
        my_keys: &[String],
        round_two: &RawMetrics,
        _accumulator: &mut Accumulator,
        sink: &mut MetricSink,
    ) -> Result<(), RefreshError> {
        let labels = NodeLabels::from_raw(round_two);

        for key in my_keys {
            let Some(payload) = round_two.get(key) else {
                continue;
            };
            let histograms =
                Self::parse(payload).map_err(|detail| RefreshError::malformed(self.name(), key, detail))?;

            for histogram in histograms {
                let operation = sanitize(histogram.operation);

                sink.emit(
                    labels
                        .gauge(format!("aerospike_latencies_{operation}_ops_sec"), histogram.ops_per_sec)
                        .with_help(format!("{} operations per second", histogram.operation))
                        .with_label("ns", histogram.namespace),
                )?;

                for (threshold, pct) in histogram.buckets {
                    sink.emit(
                        labels
                            .gauge(format!("aerospike_latencies_{operation}_pct_over"), pct)
                            .with_help(format!(
                                "Percentage of {} operations slower than the threshold",
                                histogram.operation
                            ))
                            .with_label("ns", histogram.namespace)
                            .with_label("threshold", threshold),
                    )?;
                }
            }
        }

        Ok(())
    }
}
