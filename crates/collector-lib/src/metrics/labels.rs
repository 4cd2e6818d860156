//! Catalog of label keys recognized on a [`Set`](super::Set)

use serde::Serialize;

/// A recognized label key and what it means
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LabelDescriptor {
    pub key: &'static str,
    pub description: &'static str,
}

const fn label(key: &'static str, description: &'static str) -> LabelDescriptor {
    LabelDescriptor { key, description }
}

pub const METRIC_SET_TYPE: LabelDescriptor = label(
    "type",
    "Type of the metrics set (container, pod, namespace, node, cluster)",
);
pub const CLUSTER: LabelDescriptor = label("cluster", "The name of the kubernetes cluster");
pub const POD_ID: LabelDescriptor = label("pod_id", "The unique ID of the pod");
pub const POD_NAME: LabelDescriptor = label("pod_name", "The name of the pod");
pub const NAMESPACE_NAME: LabelDescriptor = label("namespace_name", "The name of the namespace");
pub const WORKLOAD_NAME: LabelDescriptor = label(
    "workload_name",
    "Workload name, derived from top level Deployment or DaemonSet",
);
pub const WORKLOAD_KIND: LabelDescriptor = label(
    "workload_kind",
    "Workload kind, derived from top level Deployment or DaemonSet",
);
pub const DESIRED: LabelDescriptor = label("desired", "The desired number for the Pod");
pub const AVAILABLE: LabelDescriptor = label("available", "The available number for the Pod");
pub const REASON: LabelDescriptor = label("reason", "The failure reason for the Pod");
pub const MESSAGE: LabelDescriptor = label("message", "The failure message for the Pod");
pub const NAMESPACE_ID: LabelDescriptor =
    label("namespace_id", "The UID of namespace of the pod");
pub const CONTAINER_NAME: LabelDescriptor = label(
    "container_name",
    "User-provided name of the container or full container name for system containers",
);
pub const LABELS: LabelDescriptor = label("labels", "Comma-separated list of user-provided labels");
pub const NODENAME: LabelDescriptor = label("nodename", "nodename where the container ran");
pub const NODE_ROLE: LabelDescriptor = label("node_role", "Node role worker or control-plane");
pub const HOSTNAME: LabelDescriptor = label("hostname", "Hostname where the container ran");
pub const RESOURCE_ID: LabelDescriptor = label("resource_id", "Identifier(s) specific to a metric");
pub const HOST_ID: LabelDescriptor = label(
    "host_id",
    "Identifier specific to a host. Set by cloud provider or user",
);
pub const CONTAINER_BASE_IMAGE: LabelDescriptor = label(
    "container_base_image",
    "User-defined image name that is run inside the container",
);
pub const NODE_SCHEDULABLE: LabelDescriptor = label("schedulable", "Node schedulable status.");
pub const VOLUME_NAME: LabelDescriptor = label("volume_name", "The name of the volume.");
pub const PVC_NAME: LabelDescriptor = label("pvc_name", "The name of the persistent volume claim.");

/// Labels common to every entity that runs on a host
pub const COMMON_LABELS: &[LabelDescriptor] = &[NODENAME, HOSTNAME, HOST_ID];

pub const CONTAINER_LABELS: &[LabelDescriptor] = &[CONTAINER_NAME, CONTAINER_BASE_IMAGE];

pub const POD_LABELS: &[LabelDescriptor] = &[POD_NAME, POD_ID, NAMESPACE_ID, LABELS];

/// Every key the collector itself writes. User labels copied from Kubernetes
/// objects may never overwrite one of these.
pub const RESERVED_LABELS: &[LabelDescriptor] = &[
    METRIC_SET_TYPE,
    CLUSTER,
    POD_ID,
    POD_NAME,
    NAMESPACE_NAME,
    WORKLOAD_NAME,
    WORKLOAD_KIND,
    DESIRED,
    AVAILABLE,
    REASON,
    MESSAGE,
    NAMESPACE_ID,
    CONTAINER_NAME,
    LABELS,
    NODENAME,
    NODE_ROLE,
    HOSTNAME,
    RESOURCE_ID,
    HOST_ID,
    CONTAINER_BASE_IMAGE,
    NODE_SCHEDULABLE,
    VOLUME_NAME,
    PVC_NAME,
];

/// Labels supported on exported points: common + pod + metric level
pub fn supported_labels() -> Vec<LabelDescriptor> {
    let mut result = COMMON_LABELS.to_vec();
    result.extend_from_slice(POD_LABELS);
    result.push(RESOURCE_ID);
    result
}

/// Returns true if `key` belongs to the collector's own taxonomy
pub fn is_reserved(key: &str) -> bool {
    RESERVED_LABELS.iter().any(|l| l.key == key)
}
