//! Background watch tasks feeding the pod and workload caches

use super::{OwnerIndex, OwnerRef, PodStore, PodView, WorkloadCache};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::watcher::{self, watcher, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Handles to the running watch tasks. Aborts them when dropped.
pub struct WatchHandles {
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for WatchHandles {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Start watching pods, ReplicaSets and Jobs cluster-wide
pub fn spawn_watchers(
    client: Client,
    pods: Arc<PodStore>,
    workloads: Arc<WorkloadCache>,
) -> WatchHandles {
    let pod_api: Api<Pod> = Api::all(client.clone());
    let rs_api: Api<ReplicaSet> = Api::all(client.clone());
    let job_api: Api<Job> = Api::all(client);

    let rs_cache = workloads.clone();
    let job_cache = workloads;

    let tasks = vec![
        tokio::spawn(watch(pod_api, "pods", move |event| match event {
            Event::Applied(pod) => pods.apply(PodView::from(&pod)),
            Event::Deleted(pod) => {
                pods.delete(&pod.namespace().unwrap_or_default(), &pod.name_any());
            }
            Event::Restarted(all) => pods.replace_all(all.iter().map(PodView::from)),
        })),
        tokio::spawn(watch(rs_api, "replicasets", move |event| {
            apply_owner_event(&rs_cache, OwnerIndex::ReplicaSets, event)
        })),
        tokio::spawn(watch(job_api, "jobs", move |event| {
            apply_owner_event(&job_cache, OwnerIndex::Jobs, event)
        })),
    ];

    WatchHandles { tasks }
}

fn apply_owner_event<K>(cache: &WorkloadCache, index: OwnerIndex, event: Event<K>)
where
    K: Resource<DynamicType = ()>,
{
    match event {
        Event::Applied(obj) => {
            let meta = obj.meta();
            cache.apply(index, &namespace_of(meta), &name_of(meta), &owners_of(meta));
        }
        Event::Deleted(obj) => {
            let meta = obj.meta();
            cache.delete(index, &namespace_of(meta), &name_of(meta));
        }
        Event::Restarted(all) => cache.replace_all(
            index,
            all.iter().map(|obj| {
                let meta = obj.meta();
                (namespace_of(meta), name_of(meta), owners_of(meta))
            }),
        ),
    }
}

fn namespace_of(meta: &ObjectMeta) -> String {
    meta.namespace.clone().unwrap_or_default()
}

fn name_of(meta: &ObjectMeta) -> String {
    meta.name.clone().unwrap_or_default()
}

fn owners_of(meta: &ObjectMeta) -> Vec<OwnerRef> {
    meta.owner_references
        .iter()
        .flatten()
        .map(|owner| OwnerRef {
            kind: owner.kind.clone(),
            name: owner.name.clone(),
            controller: owner.controller.unwrap_or(false),
        })
        .collect()
}

async fn watch<K, F>(api: Api<K>, resource: &'static str, mut handle: F)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    F: FnMut(Event<K>) + Send,
{
    info!(resource = resource, "Starting watch");

    let stream = watcher(api, watcher::Config::default()).default_backoff();
    let mut stream = std::pin::pin!(stream);

    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => {
                if let Event::Restarted(objects) = &event {
                    debug!(resource = resource, count = objects.len(), "Watch relisted");
                }
                handle(event);
            }
            Err(e) => {
                warn!(resource = resource, error = %e, "Watch stream error, backing off");
            }
        }
    }

    warn!(resource = resource, "Watch stream ended");
}

