//! Enrichment processor chain
//!
//! Stages run strictly in sequence on one batch. Each stage takes the batch
//! by value and hands it back, so no stage can hold on to a set once its
//! turn is over. A stage error drops the whole cycle; entity-level problems
//! are handled inside the stage by dropping the entity.

mod aggregator;
mod container_state;
mod label_copier;
mod pod_enricher;
mod workload_status;


pub use aggregator::Aggregator;
pub use container_state::{
    classify, ContainerStateInfo, STATE_RUNNING, STATE_TERMINATED, STATE_UNKNOWN, STATE_WAITING,
};
pub use label_copier::{LabelCopier, LabelCopierConfig};
pub use pod_enricher::PodBasedEnricher;
pub use workload_status::workload_status_set;

use crate::config::CollectorConfig;
use crate::k8s::{CacheSnapshot, PodLister, WorkloadLookup};
use crate::metrics::Batch;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("processor {stage} failed: {reason}")]
    Stage { stage: String, reason: String },
}

/// One stage of the chain
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    fn process(&self, batch: Batch) -> Result<Batch, ProcessorError>;
}

/// Ordered list of processors applied to every batch
#[derive(Default)]
pub struct ProcessorChain {
    stages: Vec<Box<dyn Processor>>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage; stages run in the order they were added
    pub fn with(mut self, stage: impl Processor + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// The collector's chain: pod enrichment followed by the roll-ups
    /// pod-container → pod → namespace → cluster.
    pub fn standard(
        pods: Arc<dyn CacheSnapshot<dyn PodLister>>,
        workloads: Arc<dyn CacheSnapshot<dyn WorkloadLookup>>,
        config: &CollectorConfig,
    ) -> Self {
        let metrics = config.aggregated_metrics.clone();
        Self::new()
            .with(PodBasedEnricher::new(
                pods,
                workloads,
                LabelCopier::new(&config.label_copier),
                config.collection_interval(),
            ))
            .with(Aggregator::pods(metrics.clone()))
            .with(Aggregator::namespaces(metrics.clone()))
            .with(Aggregator::cluster(metrics, config.cluster_name.clone()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order, stopping at the first failure
    pub fn run(&self, mut batch: Batch) -> Result<Batch, ProcessorError> {
        for stage in &self.stages {
            let before = batch.len();
            batch = stage.process(batch)?;
            debug!(
                stage = stage.name(),
                sets_before = before,
                sets_after = batch.len(),
                "Processor stage complete"
            );
        }
        Ok(batch)
    }
}
