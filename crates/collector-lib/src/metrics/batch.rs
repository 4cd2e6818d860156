//! In-memory representation of one scrape cycle

use super::key::{EntityKind, ResourceKey};
use super::labels;
use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use thiserror::Error;

/// Discriminator for the scalar carried by a [`MetricValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Int64,
    Float,
}

/// A single scalar metric value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

impl MetricValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            MetricValue::Int(_) => ValueKind::Int64,
            MetricValue::Float(_) => ValueKind::Float,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            MetricValue::Int(v) => v as f64,
            MetricValue::Float(v) => v,
        }
    }

    /// Sum of two values; stays integral only if both sides are
    pub fn add(self, other: MetricValue) -> MetricValue {
        match (self, other) {
            (MetricValue::Int(a), MetricValue::Int(b)) => MetricValue::Int(a.saturating_add(b)),
            (a, b) => MetricValue::Float(a.as_f64() + b.as_f64()),
        }
    }
}

/// A metric carrying its own secondary labels, kept apart from the
/// entity's primary labels
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledValue {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: MetricValue,
}

/// One entity's labels and metric values for a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Set {
    kind: EntityKind,
    pub labels: BTreeMap<String, String>,
    pub values: BTreeMap<String, MetricValue>,
    pub labeled_values: Vec<LabeledValue>,
    pub entity_create_time: Option<DateTime<Utc>>,
    pub collection_start_time: Option<DateTime<Utc>>,
}

impl Set {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            labels: BTreeMap::new(),
            values: BTreeMap::new(),
            labeled_values: Vec::new(),
            entity_create_time: None,
            collection_start_time: None,
        }
    }

    /// Create an empty set carrying the identity labels implied by `key`
    pub fn for_key(key: &ResourceKey) -> Self {
        let mut set = Self::new(key.kind());
        match key {
            ResourceKey::SystemContainer { node, container } => {
                set.set_label(labels::NODENAME.key, node.as_str());
                set.set_label(labels::CONTAINER_NAME.key, container.as_str());
            }
            ResourceKey::PodContainer {
                namespace,
                pod,
                container,
            } => {
                set.set_label(labels::NAMESPACE_NAME.key, namespace.as_str());
                set.set_label(labels::POD_NAME.key, pod.as_str());
                set.set_label(labels::CONTAINER_NAME.key, container.as_str());
            }
            ResourceKey::Pod { namespace, pod } => {
                set.set_label(labels::NAMESPACE_NAME.key, namespace.as_str());
                set.set_label(labels::POD_NAME.key, pod.as_str());
            }
            ResourceKey::Namespace { namespace }
            | ResourceKey::WorkloadStatus { namespace, .. } => {
                set.set_label(labels::NAMESPACE_NAME.key, namespace.as_str());
            }
            ResourceKey::Node { node } => {
                set.set_label(labels::NODENAME.key, node.as_str());
            }
            ResourceKey::Cluster => {}
        }
        set
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Set a primary label. The `type` label is derived from the entity kind
    /// and cannot be overwritten here.
    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if key == labels::METRIC_SET_TYPE.key {
            return;
        }
        self.labels.insert(key, value.into());
    }

    pub fn set_int(&mut self, name: impl Into<String>, value: i64) {
        self.values.insert(name.into(), MetricValue::Int(value));
    }

    pub fn value(&self, name: &str) -> Option<MetricValue> {
        self.values.get(name).copied()
    }

    pub fn add_labeled_int(
        &mut self,
        name: impl Into<String>,
        labels: BTreeMap<String, String>,
        value: i64,
    ) {
        self.labeled_values.push(LabeledValue {
            name: name.into(),
            labels,
            value: MetricValue::Int(value),
        });
    }

    pub fn labeled_value(&self, name: &str) -> Option<&LabeledValue> {
        self.labeled_values.iter().find(|v| v.name == name)
    }

    /// Primary labels as exported, including the derived `type` label
    pub fn exported_labels(&self) -> BTreeMap<String, String> {
        let mut exported = self.labels.clone();
        exported.insert(
            labels::METRIC_SET_TYPE.key.to_string(),
            self.kind.as_str().to_string(),
        );
        exported
    }
}

impl Serialize for Set {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Set", 5)?;
        state.serialize_field("labels", &self.exported_labels())?;
        state.serialize_field("values", &self.values)?;
        state.serialize_field("labeled_values", &self.labeled_values)?;
        state.serialize_field("entity_create_time", &self.entity_create_time)?;
        state.serialize_field("collection_start_time", &self.collection_start_time)?;
        state.end()
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("{} resource key(s) produced by more than one source: {}", .0.len(), join_keys(.0))]
    KeyCollision(Vec<ResourceKey>),
}

fn join_keys(keys: &[ResourceKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// All entities collected in one scrape cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Batch {
    pub timestamp: DateTime<Utc>,
    pub sets: BTreeMap<ResourceKey, Set>,
}

impl Batch {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            sets: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&Set> {
        self.sets.get(key)
    }

    pub fn get_mut(&mut self, key: &ResourceKey) -> Option<&mut Set> {
        self.sets.get_mut(key)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.sets.contains_key(key)
    }

    /// Insert a set, returning the one it replaced
    pub fn insert(&mut self, key: ResourceKey, set: Set) -> Option<Set> {
        debug_assert_eq!(key.kind(), set.kind(), "set kind must match its key");
        self.sets.insert(key, set)
    }

    pub fn remove(&mut self, key: &ResourceKey) -> Option<Set> {
        self.sets.remove(key)
    }

    pub fn keys_of_kind(&self, kind: EntityKind) -> Vec<ResourceKey> {
        self.sets
            .keys()
            .filter(|key| key.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn count_of_kind(&self, kind: EntityKind) -> usize {
        self.sets.keys().filter(|key| key.kind() == kind).count()
    }

    /// Move every set of `other` into this batch.
    ///
    /// Sources own disjoint entity kinds, so a key present on both sides is a
    /// bug in a source. The set already in this batch is kept and every
    /// colliding key is reported.
    pub fn merge(&mut self, other: Batch) -> Result<(), BatchError> {
        let mut collisions = Vec::new();
        for (key, set) in other.sets {
            if self.sets.contains_key(&key) {
                collisions.push(key);
                continue;
            }
            self.sets.insert(key, set);
        }

        if collisions.is_empty() {
            Ok(())
        } else {
            Err(BatchError::KeyCollision(collisions))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn batch_with(keys: &[ResourceKey]) -> Batch {
        let mut batch = Batch::new(ts());
        for key in keys {
            let mut set = Set::for_key(key);
            set.set_int("cpu/usage", 1);
            batch.insert(key.clone(), set);
        }
        batch
    }

    #[test]
    fn test_metric_value_add() {
        assert_eq!(MetricValue::Int(2).add(MetricValue::Int(3)), MetricValue::Int(5));
        assert_eq!(
            MetricValue::Int(2).add(MetricValue::Float(0.5)),
            MetricValue::Float(2.5)
        );
        assert_eq!(MetricValue::Float(1.5).kind(), ValueKind::Float);
    }

    #[test]
    fn test_set_for_key_identity_labels() {
        let set = Set::for_key(&ResourceKey::pod_container("ns", "app-1", "web"));
        assert_eq!(set.kind(), EntityKind::PodContainer);
        assert_eq!(set.label("namespace_name"), Some("ns"));
        assert_eq!(set.label("pod_name"), Some("app-1"));
        assert_eq!(set.label("container_name"), Some("web"));
    }

    #[test]
    fn test_type_label_is_derived() {
        let mut set = Set::new(EntityKind::Pod);
        set.set_label("type", "node");
        assert_eq!(set.label("type"), None);
        assert_eq!(set.exported_labels().get("type").map(String::as_str), Some("pod"));
    }

    #[test]
    fn test_merge_disjoint_batches() {
        let mut left = batch_with(&[
            ResourceKey::pod("ns", "a"),
            ResourceKey::pod_container("ns", "a", "web"),
        ]);
        let right = batch_with(&[ResourceKey::node("n1"), ResourceKey::namespace("ns")]);
        let expected_left = left.sets.clone();
        let expected_right = right.sets.clone();

        left.merge(right).unwrap();

        assert_eq!(left.len(), 4);
        for (key, set) in expected_left.iter().chain(expected_right.iter()) {
            assert_eq!(left.get(key), Some(set));
        }
        assert_eq!(left.timestamp, ts());
    }

    #[test]
    fn test_merge_reports_collisions_and_keeps_first_writer() {
        let mut left = batch_with(&[ResourceKey::pod("ns", "a")]);
        let mut right = batch_with(&[ResourceKey::pod("ns", "a"), ResourceKey::node("n1")]);
        right
            .get_mut(&ResourceKey::pod("ns", "a"))
            .unwrap()
            .set_int("cpu/usage", 99);

        let err = left.merge(right).unwrap_err();
        match err {
            BatchError::KeyCollision(keys) => assert_eq!(keys, vec![ResourceKey::pod("ns", "a")]),
        }
        assert_eq!(left.len(), 2);
        assert_eq!(
            left.get(&ResourceKey::pod("ns", "a")).unwrap().value("cpu/usage"),
            Some(MetricValue::Int(1))
        );
    }

    #[test]
    fn test_batch_serializes_type_label() {
        let batch = batch_with(&[ResourceKey::pod("ns", "a")]);
        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["sets"]["namespace:ns/pod:a"]["labels"]["type"], "pod");
        assert_eq!(json["sets"]["namespace:ns/pod:a"]["values"]["cpu/usage"], 1);
    }
}
