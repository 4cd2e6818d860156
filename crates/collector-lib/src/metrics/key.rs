//! Typed identity of an entity inside a [`Batch`](super::Batch)

use serde::{Serialize, Serializer};
use std::fmt;

/// The level of the entity hierarchy a [`Set`](super::Set) describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    SystemContainer,
    PodContainer,
    Pod,
    Namespace,
    Node,
    Cluster,
    /// Availability record of a workload, keyed by one of its pods
    Workload,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::SystemContainer,
        EntityKind::PodContainer,
        EntityKind::Pod,
        EntityKind::Namespace,
        EntityKind::Node,
        EntityKind::Cluster,
        EntityKind::Workload,
    ];

    /// Value written to the `type` label on export
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::SystemContainer => "sys_container",
            EntityKind::PodContainer => "pod_container",
            EntityKind::Pod => "pod",
            EntityKind::Namespace => "ns",
            EntityKind::Node => "node",
            EntityKind::Cluster => "cluster",
            EntityKind::Workload => "workload",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl AsRef<str> for EntityKind {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EntityKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Stable identity of one entity within a batch.
///
/// Two keys are equal iff they address the same logical entity. The ordering
/// is total, so iterating a batch visits sets in a deterministic order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKey {
    SystemContainer {
        node: String,
        container: String,
    },
    PodContainer {
        namespace: String,
        pod: String,
        container: String,
    },
    Pod {
        namespace: String,
        pod: String,
    },
    Namespace {
        namespace: String,
    },
    Node {
        node: String,
    },
    Cluster,
    WorkloadStatus {
        namespace: String,
        pod: String,
    },
}

impl ResourceKey {
    pub fn system_container(node: impl Into<String>, container: impl Into<String>) -> Self {
        ResourceKey::SystemContainer {
            node: node.into(),
            container: container.into(),
        }
    }

    pub fn pod_container(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        ResourceKey::PodContainer {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
        }
    }

    pub fn pod(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        ResourceKey::Pod {
            namespace: namespace.into(),
            pod: pod.into(),
        }
    }

    pub fn namespace(namespace: impl Into<String>) -> Self {
        ResourceKey::Namespace {
            namespace: namespace.into(),
        }
    }

    pub fn node(node: impl Into<String>) -> Self {
        ResourceKey::Node { node: node.into() }
    }

    pub fn workload_status(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        ResourceKey::WorkloadStatus {
            namespace: namespace.into(),
            pod: pod.into(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            ResourceKey::SystemContainer { .. } => EntityKind::SystemContainer,
            ResourceKey::PodContainer { .. } => EntityKind::PodContainer,
            ResourceKey::Pod { .. } => EntityKind::Pod,
            ResourceKey::Namespace { .. } => EntityKind::Namespace,
            ResourceKey::Node { .. } => EntityKind::Node,
            ResourceKey::Cluster => EntityKind::Cluster,
            ResourceKey::WorkloadStatus { .. } => EntityKind::Workload,
        }
    }

    pub fn namespace_name(&self) -> Option<&str> {
        match self {
            ResourceKey::PodContainer { namespace, .. }
            | ResourceKey::Pod { namespace, .. }
            | ResourceKey::Namespace { namespace }
            | ResourceKey::WorkloadStatus { namespace, .. } => Some(namespace),
            _ => None,
        }
    }

    pub fn pod_name(&self) -> Option<&str> {
        match self {
            ResourceKey::PodContainer { pod, .. }
            | ResourceKey::Pod { pod, .. }
            | ResourceKey::WorkloadStatus { pod, .. } => Some(pod),
            _ => None,
        }
    }

    pub fn container_name(&self) -> Option<&str> {
        match self {
            ResourceKey::PodContainer { container, .. }
            | ResourceKey::SystemContainer { container, .. } => Some(container),
            _ => None,
        }
    }

    /// Key of the entity one level up the hierarchy, if the parent is
    /// derivable from the key alone.
    ///
    /// Nodes and system containers roll up through labels rather than
    /// identity, so they have no derivable parent.
    pub fn parent(&self) -> Option<ResourceKey> {
        match self {
            ResourceKey::PodContainer { namespace, pod, .. } => {
                Some(ResourceKey::pod(namespace.clone(), pod.clone()))
            }
            ResourceKey::Pod { namespace, .. } => Some(ResourceKey::namespace(namespace.clone())),
            ResourceKey::Namespace { .. } => Some(ResourceKey::Cluster),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::SystemContainer { node, container } => {
                write!(f, "node:{}/container:{}", node, container)
            }
            ResourceKey::PodContainer {
                namespace,
                pod,
                container,
            } => write!(f, "namespace:{}/pod:{}/container:{}", namespace, pod, container),
            ResourceKey::Pod { namespace, pod } => write!(f, "namespace:{}/pod:{}", namespace, pod),
            ResourceKey::Namespace { namespace } => write!(f, "namespace:{}", namespace),
            ResourceKey::Node { node } => write!(f, "node:{}", node),
            ResourceKey::Cluster => f.write_str("cluster"),
            ResourceKey::WorkloadStatus { namespace, pod } => {
                write!(f, "namespace:{}/workloadstatus/pod:{}", namespace, pod)
            }
        }
    }
}

impl Serialize for ResourceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
