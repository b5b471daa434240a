//! Per-set statistics.

use std::collections::HashMap;

use super::{
    Accumulator, NAMESPACES, NodeLabels, RefreshError, Watcher, parse_pairs, parse_value, sanitize,
};
use crate::metrics::MetricSink;
use crate::session::RawMetrics;

const SETS_KEY: &str = "sets";

/// Emits `aerospike_sets_<stat>{ns,set}` and a per-namespace set count.
///
/// The set count is reported for every namespace recorded by
/// [`NamespaceWatcher`](super::NamespaceWatcher), so it must run after it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetWatcher;

impl Watcher for SetWatcher {
    fn name(&self) -> &'static str {
        "set"
    }

    fn info_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn detail_keys(&self, _round_one: &RawMetrics) -> Vec<String> {
        vec![SETS_KEY.to_string()]
    }

    fn refresh(
        &self,
        my_keys: &[String],
        round_two: &RawMetrics,
        accumulator: &mut Accumulator,
        sink: &mut MetricSink,
    ) -> Result<(), RefreshError> {
        let labels = NodeLabels::from_raw(round_two);
        let mut per_namespace: HashMap<String, usize> = HashMap::new();

        for key in my_keys {
            let Some(payload) = round_two.get(key) else {
                continue;
            };

            for entry in payload.split(';').map(str::trim).filter(|e| !e.is_empty()) {
                let stats = parse_pairs(entry, ':')
                    .map_err(|detail| RefreshError::malformed(self.name(), key, detail))?;

                let field = |name: &str| stats.iter().find(|(k, _)| *k == name).map(|(_, v)| *v);
                let (Some(ns), Some(set)) = (field("ns"), field("set").or_else(|| field("set_name")))
                else {
                    return Err(RefreshError::malformed(
                        self.name(),
                        key,
                        format!("entry '{entry}' has no namespace or set name"),
                    ));
                };

                *per_namespace.entry(ns.to_string()).or_default() += 1;

                for (stat, raw) in &stats {
                    if matches!(*stat, "ns" | "set" | "set_name") {
                        continue;
                    }
                    let Some(value) = parse_value(raw) else {
                        continue;
                    };
                    sink.emit(
                        labels
                            .gauge(format!("aerospike_sets_{}", sanitize(stat)), value)
                            .with_label("ns", ns)
                            .with_label("set", set),
                    )?;
                }
            }
        }

        for ns in accumulator.names(NAMESPACES) {
            let count = per_namespace.get(ns).copied().unwrap_or(0);
            sink.emit(
                labels
                    .gauge("aerospike_namespace_sets", count as f64)
                    .with_help("Number of sets in the namespace")
                    .with_label("ns", ns),
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::testing::with_identity;

    fn accumulator_with(namespaces: &[&str]) -> Accumulator {
        let mut accu = Accumulator::new();
        for ns in namespaces {
            accu.push_name(NAMESPACES, *ns);
        }
        accu
    }

    #[test]
    fn test_refresh_emits_set_stats() {
        let round_two = with_identity(&[(
            "sets",
            "ns=test:set=users:objects=3:memory_data_bytes=120:disable-eviction=false;\
             ns=test:set=orders:objects=7:set-enable-xdr=use-default;",
        )]);
        let mut accu = accumulator_with(&["test", "bar"]);
        let mut sink = MetricSink::new();

        SetWatcher
            .refresh(&["sets".to_string()], &round_two, &mut accu, &mut sink)
            .unwrap();

        let users = sink
            .find("aerospike_sets_objects", &[("ns", "test"), ("set", "users")])
            .unwrap();
        assert_eq!(users.value, 3.0);
        assert_eq!(users.label("cluster_name"), Some("prod"));
        assert_eq!(
            sink.find("aerospike_sets_disable_eviction", &[("set", "users")])
                .unwrap()
                .value,
            0.0
        );
        assert!(sink.find("aerospike_sets_set_enable_xdr", &[]).is_none());

        assert_eq!(
            sink.find("aerospike_namespace_sets", &[("ns", "test")])
                .unwrap()
                .value,
            2.0
        );
        assert_eq!(
            sink.find("aerospike_namespace_sets", &[("ns", "bar")])
                .unwrap()
                .value,
            0.0
        );
    }

    #[test]
    fn test_missing_sets_counts_zero() {
        let mut accu = accumulator_with(&["test"]);
        let mut sink = MetricSink::new();

        SetWatcher
            .refresh(&["sets".to_string()], &with_identity(&[]), &mut accu, &mut sink)
            .unwrap();

        assert_eq!(sink.samples().len(), 1);
        assert_eq!(sink.samples()[0].value, 0.0);
    }

    #[test]
    fn test_entry_without_set_name_is_malformed() {
        let round_two = with_identity(&[("sets", "ns=test:objects=3")]);
        let err = SetWatcher
            .refresh(
                &["sets".to_string()],
                &round_two,
                &mut Accumulator::new(),
                &mut MetricSink::new(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("no namespace or set name"));
    }

    #[test]
    fn test_legacy_set_name_field() {
        let round_two = with_identity(&[("sets", "ns=test:set_name=legacy:n_objects=4")]);
        let mut sink = MetricSink::new();

        SetWatcher
            .refresh(&["sets".to_string()], &round_two, &mut Accumulator::new(), &mut sink)
            .unwrap();

        assert_eq!(
            sink.find("aerospike_sets_n_objects", &[("set", "legacy")])
                .unwrap()
                .value,
            4.0
        );
    }
}
