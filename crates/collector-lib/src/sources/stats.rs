//! The collector's own health as a metrics source
//!
//! Reads the process-wide Prometheus registry and reports it as one
//! system-container set named after the collector, so the collector's
//! health travels the same path as the cluster's metrics.

use super::{async_trait, MetricsSource, MetricsSourceProvider, SourceError};
use crate::metrics::{Batch, LabeledValue, MetricValue, ResourceKey, Set};
use chrono::{DateTime, Utc};
use prometheus::proto::{MetricFamily, MetricType};
use std::collections::BTreeMap;
use std::sync::Arc;

const SOURCE_NAME: &str = "internal_stats_source";
const PROVIDER_NAME: &str = "internal_stats_provider";

/// Container name under which the collector reports itself
pub const COLLECTOR_CONTAINER: &str = "kube-collector";

pub struct InternalStatsSource {
    node_name: String,
    started_at: DateTime<Utc>,
}

impl InternalStatsSource {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            started_at: Utc::now(),
        }
    }

    fn collect(
        &self,
        families: &[MetricFamily],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Batch {
        let key = ResourceKey::system_container(self.node_name.as_str(), COLLECTOR_CONTAINER);
        let mut set = Set::for_key(&key);
        set.entity_create_time = Some(self.started_at);
        set.collection_start_time = Some(start);

        for family in families {
            record_family(&mut set, family);
        }

        let mut batch = Batch::new(end);
        batch.insert(key, set);
        batch
    }
}

/// Unlabeled samples become plain values; labeled ones keep their labels
/// on a LabeledValue. Histograms and summaries report `_count` and `_sum`.
fn record_family(set: &mut Set, family: &MetricFamily) {
    let name = family.get_name();
    for metric in family.get_metric() {
        let labels: BTreeMap<String, String> = metric
            .get_label()
            .iter()
            .map(|pair| (pair.get_name().to_string(), pair.get_value().to_string()))
            .collect();

        let samples = match family.get_field_type() {
            MetricType::COUNTER => gauge_sample(name, metric.get_counter().get_value()),
            MetricType::GAUGE => gauge_sample(name, metric.get_gauge().get_value()),
            MetricType::UNTYPED => gauge_sample(name, metric.get_untyped().get_value()),
            MetricType::HISTOGRAM => {
                let histogram = metric.get_histogram();
                count_sum_samples(
                    name,
                    histogram.get_sample_count(),
                    histogram.get_sample_sum(),
                )
            }
            MetricType::SUMMARY => {
                let summary = metric.get_summary();
                count_sum_samples(name, summary.get_sample_count(), summary.get_sample_sum())
            }
        };

        for (sample_name, value) in samples {
            if labels.is_empty() {
                set.values.insert(sample_name, value);
            } else {
                set.labeled_values.push(LabeledValue {
                    name: sample_name,
                    labels: labels.clone(),
                    value,
                });
            }
        }
    }
}

fn gauge_sample(name: &str, value: f64) -> Vec<(String, MetricValue)> {
    vec![(name.to_string(), MetricValue::Float(value))]
}

fn count_sum_samples(name: &str, count: u64, sum: f64) -> Vec<(String, MetricValue)> {
    vec![
        (format!("{name}_count"), MetricValue::Int(saturating_i64(count))),
        (format!("{name}_sum"), MetricValue::Float(sum)),
    ]
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl MetricsSource for InternalStatsSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn scrape_metrics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Batch, SourceError> {
        Ok(self.collect(&prometheus::gather(), start, end))
    }
}

pub struct InternalStatsProvider {
    sources: Vec<Arc<dyn MetricsSource>>,
}

impl MetricsSourceProvider for InternalStatsProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn get_metrics_sources(&self) -> Vec<Arc<dyn MetricsSource>> {
        self.sources.clone()
    }
}

pub fn internal_stats_provider(node_name: impl Into<String>) -> InternalStatsProvider {
    InternalStatsProvider {
        sources: vec![Arc::new(InternalStatsSource::new(node_name))],
    }
}
