//! Pod to top-level workload resolution
//!
//! Deployments and CronJobs own pods indirectly through ReplicaSets and Jobs.
//! The cache indexes those intermediate objects together with their own
//! controller so a pod resolves in two lookups without an API call.

use super::{controller_of, CacheSnapshot, OwnerRef, PodView, WorkloadLookup};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type ObjectId = (String, String);

/// Intermediate controller kinds tracked by the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerIndex {
    ReplicaSets,
    Jobs,
}

impl OwnerIndex {
    fn for_kind(kind: &str) -> Option<Self> {
        match kind {
            "ReplicaSet" => Some(OwnerIndex::ReplicaSets),
            "Job" => Some(OwnerIndex::Jobs),
            _ => None,
        }
    }
}

/// Cross-cycle index of ReplicaSet and Job owners, updated by watch tasks
#[derive(Debug, Default)]
pub struct WorkloadCache {
    replica_sets: DashMap<ObjectId, Option<OwnerRef>>,
    jobs: DashMap<ObjectId, Option<OwnerRef>>,
    replica_sets_synced: AtomicBool,
    jobs_synced: AtomicBool,
}

impl WorkloadCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(&self, index: OwnerIndex) -> &DashMap<ObjectId, Option<OwnerRef>> {
        match index {
            OwnerIndex::ReplicaSets => &self.replica_sets,
            OwnerIndex::Jobs => &self.jobs,
        }
    }

    fn synced_flag(&self, index: OwnerIndex) -> &AtomicBool {
        match index {
            OwnerIndex::ReplicaSets => &self.replica_sets_synced,
            OwnerIndex::Jobs => &self.jobs_synced,
        }
    }

    /// Record an object and its owners
    pub fn apply(&self, index: OwnerIndex, namespace: &str, name: &str, owners: &[OwnerRef]) {
        self.index(index).insert(
            (namespace.to_string(), name.to_string()),
            controller_of(owners).cloned(),
        );
    }

    pub fn delete(&self, index: OwnerIndex, namespace: &str, name: &str) {
        self.index(index)
            .remove(&(namespace.to_string(), name.to_string()));
    }

    /// Replace one index after a watch (re)list. Entries missing from the
    /// new list are evicted only after every listed entry has been written.
    pub fn replace_all<I>(&self, index: OwnerIndex, objects: I)
    where
        I: IntoIterator<Item = (String, String, Vec<OwnerRef>)>,
    {
        let map = self.index(index);
        let mut relisted = HashSet::new();
        for (namespace, name, owners) in objects {
            let id = (namespace, name);
            map.insert(id.clone(), controller_of(&owners).cloned());
            relisted.insert(id);
        }
        map.retain(|id, _| relisted.contains(id));
        self.synced_flag(index).store(true, Ordering::Release);
    }

    pub fn is_synced(&self) -> bool {
        self.replica_sets_synced.load(Ordering::Acquire) && self.jobs_synced.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> WorkloadSnapshot {
        let copy = |map: &DashMap<ObjectId, Option<OwnerRef>>| {
            map.iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect::<HashMap<_, _>>()
        };
        WorkloadSnapshot {
            replica_sets: copy(&self.replica_sets),
            jobs: copy(&self.jobs),
        }
    }
}

impl WorkloadLookup for WorkloadCache {
    fn workload_for_pod(&self, pod: &PodView) -> (String, String) {
        resolve(pod, |index, id| {
            self.index(index).get(id).map(|entry| entry.value().clone())
        })
    }
}

impl CacheSnapshot<dyn WorkloadLookup> for WorkloadCache {
    fn take_snapshot(&self) -> Arc<dyn WorkloadLookup> {
        Arc::new(self.snapshot())
    }
}

/// Immutable copy of the owner indexes for one cycle
#[derive(Debug, Clone, Default)]
pub struct WorkloadSnapshot {
    replica_sets: HashMap<ObjectId, Option<OwnerRef>>,
    jobs: HashMap<ObjectId, Option<OwnerRef>>,
}

impl WorkloadLookup for WorkloadSnapshot {
    fn workload_for_pod(&self, pod: &PodView) -> (String, String) {
        resolve(pod, |index, id| {
            let map = match index {
                OwnerIndex::ReplicaSets => &self.replica_sets,
                OwnerIndex::Jobs => &self.jobs,
            };
            map.get(id).cloned()
        })
    }
}

fn resolve<F>(pod: &PodView, lookup: F) -> (String, String)
where
    F: Fn(OwnerIndex, &ObjectId) -> Option<Option<OwnerRef>>,
{
    let Some(owner) = controller_of(&pod.owner_references) else {
        return (pod.name.clone(), "Pod".to_string());
    };

    let Some(index) = OwnerIndex::for_kind(&owner.kind) else {
        return (owner.name.clone(), owner.kind.clone());
    };

    match lookup(index, &(pod.namespace.clone(), owner.name.clone())) {
        Some(Some(top)) => (top.name, top.kind),
        Some(None) => (owner.name.clone(), owner.kind.clone()),
        None => (String::new(), String::new()),
    }
}
