//! Pod index fed by the pod watcher

use super::{
    CacheSnapshot, ContainerSpec, ContainerState, ContainerStatusView, LookupError, OwnerRef,
    PodLister, PodPhase, PodView, Quantity, TerminatedState,
};
use dashmap::DashMap;
use k8s_openapi::api::core::v1 as core;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

type PodId = (String, String);

/// Concurrent pod index keyed by namespace/name.
///
/// Written by a single watch task, read by every cycle through
/// [`PodStore::snapshot`].
#[derive(Debug, Default)]
pub struct PodStore {
    pods: DashMap<PodId, Arc<PodView>>,
    synced: AtomicBool,
}

impl PodStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a pod
    pub fn apply(&self, pod: PodView) {
        let id = (pod.namespace.clone(), pod.name.clone());
        self.pods.insert(id, Arc::new(pod));
    }

    pub fn delete(&self, namespace: &str, name: &str) -> Option<Arc<PodView>> {
        self.pods
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|(_, pod)| pod)
    }

    /// Replace the whole index after a watch (re)list. Relisted pods are
    /// written before stale ones are evicted so readers never see a gap.
    pub fn replace_all(&self, pods: impl IntoIterator<Item = PodView>) {
        let mut relisted = HashSet::new();
        for pod in pods {
            relisted.insert((pod.namespace.clone(), pod.name.clone()));
            self.apply(pod);
        }
        self.pods.retain(|id, _| relisted.contains(id));
        self.synced.store(true, Ordering::Release);
    }

    /// True once the initial list has been loaded
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    /// Point-in-time copy of the index. Updates landing after this call are
    /// not visible through the returned snapshot.
    pub fn snapshot(&self) -> PodSnapshot {
        PodSnapshot {
            pods: self
                .pods
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }
}

impl PodLister for PodStore {
    fn get_pod(&self, namespace: &str, name: &str) -> Result<Arc<PodView>, LookupError> {
        self.pods
            .get(&(namespace.to_string(), name.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found(namespace, name))
    }
}

impl CacheSnapshot<dyn PodLister> for PodStore {
    fn take_snapshot(&self) -> Arc<dyn PodLister> {
        Arc::new(self.snapshot())
    }
}

/// Immutable view of the pod index for one cycle
#[derive(Debug, Clone, Default)]
pub struct PodSnapshot {
    pods: HashMap<PodId, Arc<PodView>>,
}

impl PodSnapshot {
    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }
}

impl PodLister for PodSnapshot {
    fn get_pod(&self, namespace: &str, name: &str) -> Result<Arc<PodView>, LookupError> {
        self.pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found(namespace, name))
    }
}

fn not_found(namespace: &str, name: &str) -> LookupError {
    LookupError::NotFound {
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

impl From<&core::Pod> for PodView {
    fn from(pod: &core::Pod) -> Self {
        let meta = &pod.metadata;
        let mut view = PodView::new(
            meta.namespace.clone().unwrap_or_default(),
            meta.name.clone().unwrap_or_default(),
        );
        view.uid = meta.uid.clone().unwrap_or_default();
        view.labels = meta.labels.clone().unwrap_or_default();
        view.owner_references = meta
            .owner_references
            .iter()
            .flatten()
            .map(|owner| OwnerRef {
                kind: owner.kind.clone(),
                name: owner.name.clone(),
                controller: owner.controller.unwrap_or(false),
            })
            .collect();

        if let Some(spec) = &pod.spec {
            view.node_name = spec.node_name.clone();
            view.containers = spec.containers.iter().map(container_spec).collect();
        }

        if let Some(status) = &pod.status {
            view.phase = status
                .phase
                .as_deref()
                .map(PodPhase::parse)
                .unwrap_or(PodPhase::Unknown);
            view.start_time = status.start_time.as_ref().map(|t| t.0);
            view.container_statuses = status
                .container_statuses
                .iter()
                .flatten()
                .map(container_status)
                .collect();
        }

        view
    }
}

fn container_spec(container: &core::Container) -> ContainerSpec {
    let (requests, limits) = match &container.resources {
        Some(resources) => (
            parse_quantities(&container.name, resources.requests.as_ref()),
            parse_quantities(&container.name, resources.limits.as_ref()),
        ),
        None => (BTreeMap::new(), BTreeMap::new()),
    };

    ContainerSpec {
        name: container.name.clone(),
        image: container.image.clone(),
        requests,
        limits,
    }
}

fn parse_quantities(
    container: &str,
    raw: Option<&BTreeMap<String, k8s_openapi::apimachinery::pkg::api::resource::Quantity>>,
) -> BTreeMap<String, Quantity> {
    let mut parsed = BTreeMap::new();
    for (resource, quantity) in raw.into_iter().flatten() {
        match Quantity::parse(&quantity.0) {
            Ok(q) => {
                parsed.insert(resource.clone(), q);
            }
            Err(e) => {
                debug!(
                    container = %container,
                    resource = %resource,
                    error = %e,
                    "Skipping resource quantity"
                );
            }
        }
    }
    parsed
}

fn container_status(status: &core::ContainerStatus) -> ContainerStatusView {
    ContainerStatusView {
        name: status.name.clone(),
        ready: status.ready,
        restart_count: status.restart_count,
        state: status
            .state
            .as_ref()
            .map(container_state)
            .unwrap_or_default(),
        last_termination: status
            .last_state
            .as_ref()
            .and_then(|s| s.terminated.as_ref())
            .map(terminated_state),
    }
}

fn container_state(state: &core::ContainerState) -> ContainerState {
    if let Some(running) = &state.running {
        ContainerState::Running {
            started_at: running.started_at.as_ref().map(|t| t.0),
        }
    } else if let Some(waiting) = &state.waiting {
        ContainerState::Waiting {
            reason: waiting.reason.clone(),
            message: waiting.message.clone(),
        }
    } else if let Some(terminated) = &state.terminated {
        ContainerState::Terminated(terminated_state(terminated))
    } else {
        ContainerState::Unknown
    }
}

fn terminated_state(terminated: &core::ContainerStateTerminated) -> TerminatedState {
    TerminatedState {
        exit_code: terminated.exit_code,
        reason: terminated.reason.clone(),
        message: terminated.message.clone(),
        finished_at: terminated.finished_at.as_ref().map(|t| t.0),
    }
}
