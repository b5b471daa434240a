//! Per-namespace statistics.

use std::collections::HashSet;

use super::{
    Accumulator, NAMESPACE_OBJECTS, NAMESPACES, NodeLabels, RefreshError, Watcher, parse_pairs,
    parse_value, sanitize,
};
use crate::metrics::MetricSink;
use crate::session::RawMetrics;

const NAMESPACE_LIST_KEY: &str = "namespaces";
const DETAIL_PREFIX: &str = "namespace/";

/// Emits `aerospike_namespace_<stat>{ns}` for every namespace the node lists.
///
/// Records each namespace name and the summed `objects` in the accumulator.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceWatcher;

impl Watcher for NamespaceWatcher {
    fn name(&self) -> &'static str {
        "namespace"
    }

    fn info_keys(&self) -> Vec<String> {
        vec![NAMESPACE_LIST_KEY.to_string()]
    }

    fn detail_keys(&self, round_one: &RawMetrics) -> Vec<String> {
        round_one
            .get(NAMESPACE_LIST_KEY)
            .map(|list| {
                // First occurrence wins.
                let mut seen = HashSet::new();
                list.split(';')
                    .map(str::trim)
                    .filter(|ns| !ns.is_empty() && seen.insert(*ns))
                    .map(|ns| format!("{DETAIL_PREFIX}{ns}"))
                    .collect()
            })
            .unwrap_or_default()
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
            let Some(ns) = key.strip_prefix(DETAIL_PREFIX) else {
                continue;
            };
            accumulator.push_name(NAMESPACES, ns);

            let Some(payload) = round_two.get(key) else {
                tracing::debug!(namespace = %ns, "No statistics returned for namespace");
                continue;
            };

            let stats = parse_pairs(payload, ';')
                .map_err(|detail| RefreshError::malformed(self.name(), key, detail))?;

            for (stat, raw) in stats {
                let Some(value) = parse_value(raw) else {
                    continue;
                };
                if stat == "objects" {
                    accumulator.add_number(NAMESPACE_OBJECTS, value);
                }
                sink.emit(
                    labels
                        .gauge(format!("aerospike_namespace_{}", sanitize(stat)), value)
                        .with_label("ns", ns),
                )?;
            }
        }

        Ok(())
    }
}
