//! Kubernetes object caches used by enrichment
//!
//! Enrichment never talks to the API server. Pods and workload owners are
//! indexed by background watch tasks ([`watch`]) into concurrent stores, and
//! each cycle reads a point-in-time snapshot of those stores.

mod pods;
mod quantity;
pub mod watch;
mod workloads;

pub use pods::{PodSnapshot, PodStore};
pub use quantity::{Quantity, QuantityError};
pub use workloads::{OwnerIndex, WorkloadCache, WorkloadSnapshot};

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("pod {namespace}/{name} not found in cache")]
    NotFound { namespace: String, name: String },
}

/// Lookup of pods by namespace and name
pub trait PodLister: Send + Sync {
    fn get_pod(&self, namespace: &str, name: &str) -> Result<Arc<PodView>, LookupError>;
}

/// Resolution of a pod to its top-level controller.
///
/// Never fails: an owner that has not been observed yet resolves to empty
/// strings.
pub trait WorkloadLookup: Send + Sync {
    fn workload_for_pod(&self, pod: &PodView) -> (String, String);
}

/// Source of per-cycle snapshots for a cache
pub trait CacheSnapshot<T: ?Sized>: Send + Sync {
    fn take_snapshot(&self) -> Arc<T>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        }
    }

    /// Integer code exported as the pod phase metric
    pub fn code(&self) -> i64 {
        match self {
            PodPhase::Pending => 1,
            PodPhase::Running => 2,
            PodPhase::Succeeded => 3,
            PodPhase::Failed => 4,
            PodPhase::Unknown => 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
    pub controller: bool,
}

/// Pick the managing controller out of an owner list, falling back to the
/// first owner when none is flagged as controller
pub fn controller_of(owners: &[OwnerRef]) -> Option<&OwnerRef> {
    owners.iter().find(|o| o.controller).or_else(|| owners.first())
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: Option<String>,
    pub requests: BTreeMap<String, Quantity>,
    pub limits: BTreeMap<String, Quantity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TerminatedState {
    pub exit_code: i32,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ContainerState {
    Running {
        started_at: Option<DateTime<Utc>>,
    },
    Waiting {
        reason: Option<String>,
        message: Option<String>,
    },
    Terminated(TerminatedState),
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerStatusView {
    pub name: String,
    pub ready: bool,
    pub restart_count: i32,
    pub state: ContainerState,
    pub last_termination: Option<TerminatedState>,
}

/// The parts of a pod enrichment reads
#[derive(Debug, Clone, PartialEq)]
pub struct PodView {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub phase: PodPhase,
    pub start_time: Option<DateTime<Utc>>,
    pub node_name: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerRef>,
    pub containers: Vec<ContainerSpec>,
    pub container_statuses: Vec<ContainerStatusView>,
}

impl PodView {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: String::new(),
            phase: PodPhase::Unknown,
            start_time: None,
            node_name: None,
            labels: BTreeMap::new(),
            owner_references: Vec::new(),
            containers: Vec::new(),
            container_statuses: Vec::new(),
        }
    }

    pub fn has_owner_reference(&self) -> bool {
        !self.owner_references.is_empty()
    }

    pub fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers.iter().find(|c| c.name == name)
    }

    pub fn container_status(&self, name: &str) -> Option<&ContainerStatusView> {
        self.container_statuses.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_phase_codes() {
        assert_eq!(PodPhase::parse("Pending").code(), 1);
        assert_eq!(PodPhase::parse("Running").code(), 2);
        assert_eq!(PodPhase::parse("Succeeded").code(), 3);
        assert_eq!(PodPhase::parse("Failed").code(), 4);
        assert_eq!(PodPhase::parse("Evicted").code(), 5);
    }

    #[test]
    fn test_controller_of_prefers_controller_flag() {
        let owners = vec![
            OwnerRef {
                kind: "ConfigMap".into(),
                name: "cm".into(),
                controller: false,
            },
            OwnerRef {
                kind: "ReplicaSet".into(),
                name: "web-5d8f".into(),
                controller: true,
            },
        ];
        assert_eq!(controller_of(&owners).unwrap().name, "web-5d8f");
        assert_eq!(controller_of(&owners[..1]).unwrap().name, "cm");
        assert!(controller_of(&[]).is_none());
    }
}
