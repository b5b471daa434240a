//! Node-wide statistics.

use super::{
    Accumulator, NAMESPACE_OBJECTS, NAMESPACES, NodeLabels, RefreshError, Watcher, parse_pairs,
    parse_value, sanitize,
};
use crate::metrics::MetricSink;
use crate::session::RawMetrics;

const STATISTICS_KEY: &str = "statistics";

/// Stat name suffixes reported as counters.
const COUNTER_SUFFIXES: [&str; 4] = ["_success", "_error", "_timeout", "_total"];

/// Emits `aerospike_node_stats_<stat>` plus namespace aggregates read from the accumulator.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsWatcher;

fn is_counter(stat: &str) -> bool {
    COUNTER_SUFFIXES.iter().any(|suffix| stat.ends_with(suffix))
}

impl Watcher for StatsWatcher {
    fn name(&self) -> &'static str {
        "stats"
    }

    fn info_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn detail_keys(&self, _round_one: &RawMetrics) -> Vec<String> {
        vec![STATISTICS_KEY.to_string()]
    }

    fn refresh(
        &self,
        my_keys: &[String],
        round_two: &RawMetrics,
        accumulator: &mut Accumulator,
        sink: &mut MetricSink,
    ) -> Result<(), RefreshError> {
        let labels = NodeLabels::from_raw(round_two);

        for key in my_keys {
            let Some(payload) = round_two.get(key) else {
                continue;
            };
            let stats = parse_pairs(payload, ';')
                .map_err(|detail| RefreshError::malformed(self.name(), key, detail))?;

            for (stat, raw) in stats {
                let Some(value) = parse_value(raw) else {
                    continue;
                };
                let name = format!("aerospike_node_stats_{}", sanitize(stat));
                let sample = if is_counter(stat) {
                    labels.counter(name, value)
                } else {
                    labels.gauge(name, value)
                };
                sink.emit(sample)?;
            }
        }

        sink.emit(
            labels
                .gauge(
                    "aerospike_node_stats_namespaces",
                    accumulator.names(NAMESPACES).len() as f64,
                )
                .with_help("Number of namespaces on the node"),
        )?;
        sink.emit(
            labels
                .gauge(
                    "aerospike_node_stats_namespace_objects",
                    accumulator.number(NAMESPACE_OBJECTS).unwrap_or(0.0),
                )
                .with_help("Objects summed over all namespaces"),
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricKind;
    use crate::watcher::testing::with_identity;

    #[test]
    fn test_counter_suffixes() {
        assert!(is_counter("client_read_success"));
        assert!(is_counter("client_write_error"));
        assert!(is_counter("client_read_timeout"));
        assert!(is_counter("batch_index_total"));
        assert!(!is_counter("uptime"));
        assert!(!is_counter("heap_efficiency_pct"));
    }

    #[test]
    fn test_refresh_emits_stats_and_aggregates() {
        let round_two = with_identity(&[(
            "statistics",
            "uptime=3600;client_connections=12;client_read_success=900;cluster_integrity=true;paxos_principal=BB9",
        )]);
        let mut accu = Accumulator::new();
        accu.push_name(NAMESPACES, "test");
        accu.push_name(NAMESPACES, "bar");
        accu.add_number(NAMESPACE_OBJECTS, 15.0);
        let mut sink = MetricSink::new();

        StatsWatcher
            .refresh(&["statistics".to_string()], &round_two, &mut accu, &mut sink)
            .unwrap();

        let uptime = sink.find("aerospike_node_stats_uptime", &[]).unwrap();
        assert_eq!(uptime.kind, MetricKind::Gauge);
        assert_eq!(uptime.value, 3600.0);
        assert_eq!(uptime.label("service"), Some("10.0.0.1:3000"));

        let reads = sink
            .find("aerospike_node_stats_client_read_success", &[])
            .unwrap();
        assert_eq!(reads.kind, MetricKind::Counter);

        assert_eq!(
            sink.find("aerospike_node_stats_cluster_integrity", &[])
                .unwrap()
                .value,
            1.0
        );
        assert!(sink.find("aerospike_node_stats_paxos_principal", &[]).is_none());

        assert_eq!(
            sink.find("aerospike_node_stats_namespaces", &[]).unwrap().value,
            2.0
        );
        assert_eq!(
            sink.find("aerospike_node_stats_namespace_objects", &[])
                .unwrap()
                .value,
            15.0
        );

        let text = sink.encode_text().unwrap();
        assert!(text.contains("# TYPE aerospike_node_stats_client_read_success counter"));
    }

    #[test]
    fn test_missing_statistics_still_reports_aggregates() {
        let mut sink = MetricSink::new();
        StatsWatcher
            .refresh(
                &["statistics".to_string()],
                &with_identity(&[]),
                &mut Accumulator::new(),
                &mut sink,
            )
            .unwrap();

        assert_eq!(sink.samples().len(), 2);
        assert!(sink.samples().iter().all(|s| s.value == 0.0));
    }

    #[test]
    fn test_malformed_statistics() {
        let round_two = with_identity(&[("statistics", "uptime=1;oops")]);
        let err = StatsWatcher
            .refresh(
                &["statistics".to_string()],
                &round_two,
                &mut Accumulator::new(),
                &mut MetricSink::new(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("stats: malformed 'statistics' response"));
    }
}
