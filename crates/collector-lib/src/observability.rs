//! Observability for the collector itself
//!
//! Provides:
//! - Prometheus metrics (cycle latency, sets exported, dropped cycles and entities)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for cycle latency (in seconds)
const CYCLE_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

static GLOBAL_METRICS: OnceLock<CollectorMetricsInner> = OnceLock::new();

struct CollectorMetricsInner {
    cycle_latency_seconds: Histogram,
    sets_exported: IntGauge,
    cycles_dropped: IntCounter,
    entities_dropped: IntCounter,
    stubs_synthesized: IntCounter,
    source_failures: IntCounterVec,
    key_collisions: IntCounter,
}

impl CollectorMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "kube_collector_cycle_latency_seconds",
                "Time spent scraping, processing and exporting one batch",
                CYCLE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            sets_exported: register_int_gauge!(
                "kube_collector_sets_exported",
                "Number of metric sets in the last exported batch"
            )
            .expect("Failed to register sets_exported"),

            cycles_dropped: register_int_counter!(
                "kube_collector_cycles_dropped_total",
                "Batches dropped because a processor failed"
            )
            .expect("Failed to register cycles_dropped"),

            entities_dropped: register_int_counter!(
                "kube_collector_entities_dropped_total",
                "Entities dropped because their pod was not in the cache"
            )
            .expect("Failed to register entities_dropped"),

            stubs_synthesized: register_int_counter!(
                "kube_collector_stubs_synthesized_total",
                "Pod and container sets created from cluster state"
            )
            .expect("Failed to register stubs_synthesized"),

            source_failures: register_int_counter_vec!(
                "kube_collector_source_failures_total",
                "Metrics source scrapes that failed or timed out",
                &["source"]
            )
            .expect("Failed to register source_failures"),

            key_collisions: register_int_counter!(
                "kube_collector_key_collisions_total",
                "Sets discarded because another source reported the same key"
            )
            .expect("Failed to register key_collisions"),
        }
    }
}

/// Collector metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct CollectorMetrics {
    _private: (),
}

impl Default for CollectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(CollectorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &CollectorMetricsInner {
        GLOBAL_METRICS.get_or_init(CollectorMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
    }

    pub fn set_sets_exported(&self, count: usize) {
        self.inner().sets_exported.set(count as i64);
    }

    pub fn inc_cycles_dropped(&self) {
        self.inner().cycles_dropped.inc();
    }

    pub fn add_entities_dropped(&self, count: u64) {
        self.inner().entities_dropped.inc_by(count);
    }

    pub fn add_stubs_synthesized(&self, count: u64) {
        self.inner().stubs_synthesized.inc_by(count);
    }

    pub fn inc_source_failures(&self, source: &str) {
        self.inner()
            .source_failures
            .with_label_values(&[source])
            .inc();
    }

    pub fn add_key_collisions(&self, count: u64) {
        self.inner().key_collisions.inc_by(count);
    }
}

/// Structured logger for collector events
///
/// Every event carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, cluster_name: &str, interval_secs: u64) {
        info!(
            event = "collector_started",
            node = %self.node_name,
            collector_version = %version,
            cluster = %cluster_name,
            interval_secs = interval_secs,
            "Collector started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "collector_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Collector shutting down"
        );
    }

    pub fn log_cycle_complete(&self, sets: usize, scraped: usize, duration_ms: u128) {
        info!(
            event = "cycle_complete",
            node = %self.node_name,
            sets = sets,
            scraped = scraped,
            duration_ms = duration_ms as u64,
            "Collection cycle complete"
        );
    }

    pub fn log_cycle_dropped(&self, reason: &str) {
        warn!(
            event = "cycle_dropped",
            node = %self.node_name,
            reason = %reason,
            "Dropping batch for this cycle"
        );
    }

    pub fn log_source_failed(&self, source: &str, error: &str) {
        warn!(
            event = "source_failed",
            node = %self.node_name,
            source = %source,
            error = %error,
            "Metrics source failed"
        );
    }

    pub fn log_config_reloaded(&self, path: &str) {
        info!(
            event = "config_reloaded",
            node = %self.node_name,
            path = %path,
            "Configuration reloaded"
        );
    }

    pub fn log_config_rejected(&self, path: &str, error: &str) {
        warn!(
            event = "config_rejected",
            node = %self.node_name,
            path = %path,
            error = %error,
            "Configuration change rejected, keeping previous configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handles_share_registry() {
        let first = CollectorMetrics::new();
        let second = CollectorMetrics::default();

        let before = first.inner().stubs_synthesized.get();
        second.add_stubs_synthesized(3);
        assert!(first.inner().stubs_synthesized.get() >= before + 3);
    }

    #[test]
    fn test_source_failures_labeled_by_source() {
        let metrics = CollectorMetrics::new();
        metrics.inc_source_failures("test_source_a");
        metrics.inc_source_failures("test_source_a");

        let count = metrics
            .inner()
            .source_failures
            .with_label_values(&["test_source_a"])
            .get();
        assert!(count >= 2);
    }

    #[test]
    fn test_metrics_gathered() {
        let metrics = CollectorMetrics::new();
        metrics.observe_cycle_latency(0.02);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "kube_collector_cycle_latency_seconds"));
    }
}
