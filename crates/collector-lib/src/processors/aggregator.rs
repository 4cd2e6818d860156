//! Roll-up of metric values one level up the entity hierarchy

use super::{Processor, ProcessorError};
use crate::metrics::{labels, Batch, EntityKind, MetricValue, ResourceKey, Set};
use std::collections::BTreeMap;

/// Sums selected metrics of every child entity into its parent.
///
/// A parent missing from the batch is synthesized. A metric the parent
/// already carried before the roll-up is left untouched, so values reported
/// directly by a source take precedence over sums.
pub struct Aggregator {
    name: &'static str,
    child: EntityKind,
    metrics: Vec<String>,
    cluster_name: Option<String>,
}

impl Aggregator {
    /// pod-container → pod
    pub fn pods(metrics: Vec<String>) -> Self {
        Self {
            name: "pod_aggregator",
            child: EntityKind::PodContainer,
            metrics,
            cluster_name: None,
        }
    }

    /// pod → namespace
    pub fn namespaces(metrics: Vec<String>) -> Self {
        Self {
            name: "namespace_aggregator",
            child: EntityKind::Pod,
            metrics,
            cluster_name: None,
        }
    }

    /// namespace → cluster. The cluster entity is labeled with `cluster_name`.
    pub fn cluster(metrics: Vec<String>, cluster_name: impl Into<String>) -> Self {
        Self {
            name: "cluster_aggregator",
            child: EntityKind::Namespace,
            metrics,
            cluster_name: Some(cluster_name.into()),
        }
    }
}

impl Processor for Aggregator {
    fn name(&self) -> &str {
        self.name
    }

    fn process(&self, mut batch: Batch) -> Result<Batch, ProcessorError> {
        let mut sums: BTreeMap<ResourceKey, BTreeMap<&str, MetricValue>> = BTreeMap::new();

        for (key, set) in batch.sets.iter().filter(|(key, _)| key.kind() == self.child) {
            let Some(parent) = key.parent() else {
                return Err(ProcessorError::Stage {
                    stage: self.name.to_string(),
                    reason: format!("{} has no parent entity", key),
                });
            };
            let parent_sums = sums.entry(parent).or_default();
            for name in &self.metrics {
                if let Some(value) = set.value(name) {
                    parent_sums
                        .entry(name.as_str())
                        .and_modify(|sum| *sum = sum.add(value))
                        .or_insert(value);
                }
            }
        }

        for (parent_key, values) in sums {
            let parent = batch
                .sets
                .entry(parent_key)
                .or_insert_with_key(|key| Set::for_key(key));
            if let Some(cluster) = &self.cluster_name {
                parent.set_label(labels::CLUSTER.key, cluster.as_str());
            }
            for (name, value) in values {
                parent.values.entry(name.to_string()).or_insert(value);
            }
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn set_with(key: &ResourceKey, values: &[(&str, i64)]) -> Set {
        let mut set = Set::for_key(key);
        for (name, value) in values {
            set.set_int(*name, *value);
        }
        set
    }

    fn metrics() -> Vec<String> {
        vec!["cpu/request".to_string(), "memory/request".to_string()]
    }

    #[test]
    fn test_pod_aggregation_sums_containers() {
        let mut batch = Batch::new(Utc::now());
        for (container, cpu) in [("web", 100), ("sidecar", 50)] {
            let key = ResourceKey::pod_container("ns", "app-1", container);
            batch.insert(
                key.clone(),
                set_with(&key, &[("cpu/request", cpu), ("cpu/usage", 7)]),
            );
        }
        let pod = ResourceKey::pod("ns", "app-1");
        batch.insert(pod.clone(), Set::for_key(&pod));

        let batch = Aggregator::pods(metrics()).process(batch).unwrap();

        let pod_set = batch.get(&pod).unwrap();
        assert_eq!(pod_set.value("cpu/request"), Some(MetricValue::Int(150)));
        assert_eq!(pod_set.value("cpu/usage"), None);
        assert_eq!(pod_set.value("memory/request"), None);
    }

    #[test]
    fn test_source_value_takes_precedence() {
        let mut batch = Batch::new(Utc::now());
        let container = ResourceKey::pod_container("ns", "app-1", "web");
        batch.insert(container.clone(), set_with(&container, &[("cpu/request", 100)]));
        let pod = ResourceKey::pod("ns", "app-1");
        batch.insert(pod.clone(), set_with(&pod, &[("cpu/request", 999)]));

        let batch = Aggregator::pods(metrics()).process(batch).unwrap();
        assert_eq!(
            batch.get(&pod).unwrap().value("cpu/request"),
            Some(MetricValue::Int(999))
        );
    }

    #[test]
    fn test_namespace_and_cluster_are_synthesized() {
        let mut batch = Batch::new(Utc::now());
        for (ns, pod, cpu) in [("a", "p1", 100), ("a", "p2", 200), ("b", "p3", 5)] {
            let key = ResourceKey::pod(ns, pod);
            batch.insert(key.clone(), set_with(&key, &[("cpu/request", cpu)]));
        }

        let batch = Aggregator::namespaces(metrics()).process(batch).unwrap();
        let batch = Aggregator::cluster(metrics(), "prod").process(batch).unwrap();

        let ns_a = batch.get(&ResourceKey::namespace("a")).unwrap();
        assert_eq!(ns_a.kind(), EntityKind::Namespace);
        assert_eq!(ns_a.label("namespace_name"), Some("a"));
        assert_eq!(ns_a.value("cpu/request"), Some(MetricValue::Int(300)));

        let cluster = batch.get(&ResourceKey::Cluster).unwrap();
        assert_eq!(cluster.label("cluster"), Some("prod"));
        assert_eq!(cluster.value("cpu/request"), Some(MetricValue::Int(305)));
    }

    #[test]
    fn test_empty_batch_is_untouched() {
        let batch = Batch::new(Utc::now());
        let batch = Aggregator::cluster(metrics(), "prod").process(batch).unwrap();
        assert!(batch.is_empty());
    }
}
