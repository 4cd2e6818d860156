use crate::k8s::{ContainerState, PodView};
use crate::metrics::{descriptors, labels, ResourceKey, Set};
use std::collections::BTreeMap;

/// Availability record for a pod that no controller manages.
///
/// A standalone pod wants exactly one replica. It is available unless a
/// container that is not ready reports waiting or terminated, in which case
/// that container's reason and message are carried along.
pub fn workload_status_set(
    pod: &PodView,
    workload_name: &str,
    workload_kind: &str,
) -> (ResourceKey, Set) {
    let key = ResourceKey::workload_status(pod.namespace.clone(), pod.name.clone());
    let mut set = Set::for_key(&key);
    set.set_label(labels::WORKLOAD_NAME.key, workload_name);
    set.set_label(labels::WORKLOAD_KIND.key, workload_kind);

    let mut available = 1;
    for status in pod.container_statuses.iter().filter(|s| !s.ready) {
        let (reason, message) = match &status.state {
            ContainerState::Waiting { reason, message } => (reason, message),
            ContainerState::Terminated(terminated) => (&terminated.reason, &terminated.message),
            _ => continue,
        };
        available = 0;
        set.set_label(labels::REASON.key, reason.clone().unwrap_or_default());
        set.set_label(labels::MESSAGE.key, message.clone().unwrap_or_default());
        break;
    }

    set.set_label(labels::AVAILABLE.key, available.to_string());
    set.set_label(labels::DESIRED.key, "1");
    set.add_labeled_int(descriptors::WORKLOAD_STATUS.name, BTreeMap::new(), available);
    (key, set)
}
