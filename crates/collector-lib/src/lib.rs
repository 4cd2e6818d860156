//! Collector library for Kubernetes cluster telemetry
//!
//! This crate provides the core functionality for:
//! - The batch/set data model and the metric and label taxonomy
//! - Pod and workload caches fed by Kubernetes watches
//! - The enrichment processor chain
//! - Metrics sources, cycle scheduling and export
//! - Configuration, health checks and observability

pub mod config;
pub mod exporter;
pub mod health;
pub mod k8s;
pub mod metrics;
pub mod observability;
pub mod processors;
pub mod scheduler;
pub mod sources;

pub use config::{CollectorConfig, ConfigError, ConfigHandler, ConfigWatcher, FileListener};
pub use exporter::{Exporter, LogExporter};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use metrics::{Batch, BatchError, EntityKind, LabeledValue, MetricValue, ResourceKey, Set};
pub use observability::{CollectorMetrics, StructuredLogger};
pub use processors::{Processor, ProcessorChain, ProcessorError};
pub use scheduler::{CollectionLoop, CollectionLoopBuilder, CycleReport};
pub use sources::{MetricsSource, MetricsSourceProvider, SourceError};
