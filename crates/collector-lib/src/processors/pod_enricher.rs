//! Attaches pod metadata to pod and pod-container entities
//!
//! Besides enriching what was scraped, this stage keeps the pod layer of the
//! hierarchy complete: a container whose pod was not scraped gets a pod stub,
//! a running pod gets a stub for every declared container that was not
//! scraped, and a running pod without a controller gets a workload status
//! entity.

use super::container_state::classify;
use super::workload_status::workload_status_set;
use super::{LabelCopier, Processor, ProcessorError};
use crate::k8s::{
    CacheSnapshot, ContainerSpec, ContainerStatusView, PodLister, PodPhase, PodView,
    WorkloadLookup,
};
use crate::metrics::{descriptors, labels, Batch, EntityKind, ResourceKey, Set};
use crate::observability::CollectorMetrics;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Host labels a synthesized entity inherits from the entity it was derived from
const INHERITED_HOST_LABELS: [labels::LabelDescriptor; 3] =
    [labels::NODENAME, labels::HOSTNAME, labels::HOST_ID];

pub struct PodBasedEnricher {
    pods: Arc<dyn CacheSnapshot<dyn PodLister>>,
    workloads: Arc<dyn CacheSnapshot<dyn WorkloadLookup>>,
    label_copier: LabelCopier,
    collection_interval: Duration,
}

impl PodBasedEnricher {
    pub fn new(
        pods: Arc<dyn CacheSnapshot<dyn PodLister>>,
        workloads: Arc<dyn CacheSnapshot<dyn WorkloadLookup>>,
        label_copier: LabelCopier,
        collection_interval: Duration,
    ) -> Self {
        Self {
            pods,
            workloads,
            label_copier,
            collection_interval,
        }
    }
}

impl Processor for PodBasedEnricher {
    fn name(&self) -> &str {
        "pod_based_enricher"
    }

    fn process(&self, mut batch: Batch) -> Result<Batch, ProcessorError> {
        let mut pass = EnrichmentPass {
            pods: self.pods.take_snapshot(),
            workloads: self.workloads.take_snapshot(),
            label_copier: &self.label_copier,
            collection_interval: self.collection_interval,
            collection_time: batch.timestamp,
            new_sets: BTreeMap::new(),
            current: None,
            dropped: 0,
            stubs: 0,
        };

        let keys: Vec<ResourceKey> = batch
            .sets
            .keys()
            .filter(|key| matches!(key.kind(), EntityKind::Pod | EntityKind::PodContainer))
            .cloned()
            .collect();

        for key in keys {
            let (Some(namespace), Some(pod_name)) = (key.namespace_name(), key.pod_name()) else {
                continue;
            };

            let pod = match pass.pods.get_pod(namespace, pod_name) {
                Ok(pod) => pod,
                Err(e) => {
                    batch.remove(&key);
                    pass.dropped += 1;
                    debug!(key = %key, error = %e, "Failed to get pod from cache, dropping entity");
                    continue;
                }
            };

            // Take the set out so the rest of the batch stays readable while
            // it is being enriched.
            let Some(mut set) = batch.remove(&key) else {
                continue;
            };
            pass.current = Some(key.clone());
            if key.kind() == EntityKind::Pod {
                pass.add_pod_info(&mut set, &pod, &batch);
            } else {
                pass.add_container_info(&key, &mut set, &pod, &batch);
            }
            pass.current = None;
            batch.insert(key, set);
        }

        let metrics = CollectorMetrics::new();
        metrics.add_entities_dropped(pass.dropped);
        metrics.add_stubs_synthesized(pass.stubs);
        if pass.dropped > 0 || pass.stubs > 0 {
            debug!(dropped = pass.dropped, stubs = pass.stubs, "Pod enrichment complete");
        }

        for (key, set) in pass.new_sets {
            batch.insert(key, set);
        }
        Ok(batch)
    }
}

/// State for enriching one batch against one cache snapshot
struct EnrichmentPass<'a> {
    pods: Arc<dyn PodLister>,
    workloads: Arc<dyn WorkloadLookup>,
    label_copier: &'a LabelCopier,
    collection_interval: Duration,
    collection_time: DateTime<Utc>,
    new_sets: BTreeMap<ResourceKey, Set>,
    /// Set currently taken out of the batch for enrichment
    current: Option<ResourceKey>,
    dropped: u64,
    stubs: u64,
}

impl EnrichmentPass<'_> {
    /// Whether `key` already has a set this cycle
    fn is_known(&self, key: &ResourceKey, batch: &Batch) -> bool {
        batch.contains(key) || self.new_sets.contains_key(key) || self.current.as_ref() == Some(key)
    }

    fn add_container_info(
        &mut self,
        key: &ResourceKey,
        set: &mut Set,
        pod: &PodView,
        batch: &Batch,
    ) {
        let container_name = key.container_name().unwrap_or_default();

        if let Some(spec) = pod.container(container_name) {
            update_resources_and_limits(set, spec);
            if !set.labels.contains_key(labels::CONTAINER_BASE_IMAGE.key) {
                set.set_label(
                    labels::CONTAINER_BASE_IMAGE.key,
                    spec.image.clone().unwrap_or_default(),
                );
            }
        }

        if let Some(status) = pod.container_status(container_name) {
            self.add_status_metrics(set, status);
        }
        if let Some(start_time) = pod.start_time {
            set.entity_create_time = Some(start_time);
        }

        let (workload_name, workload_kind) = self.workloads.workload_for_pod(pod);
        set.set_label(labels::WORKLOAD_NAME.key, workload_name);
        set.set_label(labels::WORKLOAD_KIND.key, workload_kind);
        set.set_label(labels::POD_ID.key, pod.uid.clone());
        self.label_copier.copy(&pod.labels, &mut set.labels);

        let Some(pod_key) = key.parent() else {
            return;
        };
        if self.is_known(&pod_key, batch) {
            return;
        }

        debug!(key = %pod_key, "Pod not found, creating a stub");
        let mut pod_set = Set::for_key(&pod_key);
        inherit_host_labels(set, &mut pod_set);
        pod_set.entity_create_time = pod.start_time;
        self.add_pod_info(&mut pod_set, pod, batch);
        self.new_sets.insert(pod_key, pod_set);
        self.stubs += 1;
    }

    fn add_pod_info(&mut self, set: &mut Set, pod: &PodView, batch: &Batch) {
        // Pods in other phases are reported by the non-running pod tracking
        if pod.phase != PodPhase::Running {
            return;
        }

        set.set_label(labels::POD_ID.key, pod.uid.clone());
        if let Some(start_time) = pod.start_time {
            set.entity_create_time = Some(start_time);
        }
        self.label_copier.copy(&pod.labels, &mut set.labels);

        set.add_labeled_int(
            descriptors::POD_PHASE.name,
            BTreeMap::from([("phase".to_string(), pod.phase.as_str().to_string())]),
            pod.phase.code(),
        );

        let (workload_name, workload_kind) = self.workloads.workload_for_pod(pod);
        set.set_label(labels::WORKLOAD_NAME.key, workload_name.clone());
        set.set_label(labels::WORKLOAD_KIND.key, workload_kind.clone());

        if !pod.has_owner_reference() {
            let (key, status) = workload_status_set(pod, &workload_name, &workload_kind);
            self.new_sets.insert(key, status);
        }

        let mut created = Vec::new();
        for spec in &pod.containers {
            let container_key = ResourceKey::pod_container(
                pod.namespace.clone(),
                pod.name.clone(),
                spec.name.clone(),
            );
            if self.is_known(&container_key, batch) {
                continue;
            }

            debug!(key = %container_key, "Container not found, creating a stub");
            let mut container_set = Set::for_key(&container_key);
            container_set.set_label(
                labels::CONTAINER_BASE_IMAGE.key,
                spec.image.clone().unwrap_or_default(),
            );
            container_set.set_label(labels::POD_ID.key, pod.uid.clone());
            inherit_host_labels(set, &mut container_set);
            container_set.set_label(labels::WORKLOAD_NAME.key, workload_name.clone());
            container_set.set_label(labels::WORKLOAD_KIND.key, workload_kind.clone());
            container_set.entity_create_time = set.collection_start_time;
            self.label_copier.copy(&pod.labels, &mut container_set.labels);
            update_resources_and_limits(&mut container_set, spec);

            self.new_sets.insert(container_key.clone(), container_set);
            created.push(container_key);
            self.stubs += 1;
        }

        // Back-fill status-derived metrics onto the stubs just created
        for status in &pod.container_statuses {
            let container_key = ResourceKey::pod_container(
                pod.namespace.clone(),
                pod.name.clone(),
                status.name.clone(),
            );
            if !created.contains(&container_key) {
                continue;
            }
            if let Some(container_set) = self.new_sets.get_mut(&container_key) {
                add_status_metrics(
                    container_set,
                    status,
                    self.collection_time,
                    self.collection_interval,
                );
            }
        }
    }

    fn add_status_metrics(&self, set: &mut Set, status: &ContainerStatusView) {
        add_status_metrics(set, status, self.collection_time, self.collection_interval);
    }
}

fn add_status_metrics(
    set: &mut Set,
    status: &ContainerStatusView,
    collection_time: DateTime<Utc>,
    interval: Duration,
) {
    set.set_int(descriptors::RESTART_COUNT.name, i64::from(status.restart_count));
    let state = classify(collection_time, interval, status);
    set.add_labeled_int(descriptors::CONTAINER_STATUS.name, state.metric_tags(), state.value);
}

fn inherit_host_labels(from: &Set, to: &mut Set) {
    for label in INHERITED_HOST_LABELS {
        if let Some(value) = from.label(label.key) {
            to.set_label(label.key, value);
        }
    }
}

/// Request and limit metrics for a container. CPU, memory and ephemeral
/// storage are always present, zero when not set in the spec.
fn update_resources_and_limits(set: &mut Set, spec: &ContainerSpec) {
    for (resource, quantity) in &spec.requests {
        let metric = descriptors::request_metric(resource);
        let value = if resource == "cpu" {
            quantity.milli_value()
        } else {
            quantity.value()
        };
        set.set_int(metric.name, value);
    }

    for (resource, metric) in [
        ("cpu", descriptors::CPU_REQUEST),
        ("memory", descriptors::MEMORY_REQUEST),
        ("ephemeral-storage", descriptors::EPHEMERAL_STORAGE_REQUEST),
    ] {
        if !spec.requests.contains_key(resource) {
            set.set_int(metric.name, 0);
        }
    }

    let limit = |resource: &str| spec.limits.get(resource);
    set.set_int(
        descriptors::CPU_LIMIT.name,
        limit("cpu").map(|q| q.milli_value()).unwrap_or(0),
    );
    set.set_int(
        descriptors::MEMORY_LIMIT.name,
        limit("memory").map(|q| q.value()).unwrap_or(0),
    );
    set.set_int(
        descriptors::EPHEMERAL_STORAGE_LIMIT.name,
        limit("ephemeral-storage").map(|q| q.value()).unwrap_or(0),
    );
}
