//! Metrics sources and the per-cycle scrape fan-out
//!
//! A provider groups one or more sources. Every source is scraped in its own
//! task with its own timeout; a failed or late source contributes nothing and
//! the cycle carries on with the rest.

mod stats;

pub use stats::{internal_stats_provider, InternalStatsProvider, InternalStatsSource};

use crate::metrics::{Batch, BatchError};
use crate::observability::{CollectorMetrics, StructuredLogger};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

pub use async_trait::async_trait;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("scrape of {source_name} failed: {reason}")]
    Scrape { source_name: String, reason: String },
    #[error("scrape of {source_name} timed out after {timeout:?}")]
    Timeout {
        source_name: String,
        timeout: Duration,
    },
}

/// A single scrape target producing one raw batch per cycle
#[async_trait]
pub trait MetricsSource: Send + Sync {
    fn name(&self) -> &str;

    async fn scrape_metrics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Batch, SourceError>;
}

/// Groups the sources of one kind (kubelets, internal stats, ...)
pub trait MetricsSourceProvider: Send + Sync {
    fn name(&self) -> &str;

    fn get_metrics_sources(&self) -> Vec<Arc<dyn MetricsSource>>;
}

/// Result of scraping every registered source once
#[derive(Debug)]
pub struct ScrapeOutcome {
    pub batch: Batch,
    pub succeeded: usize,
    pub failed: Vec<String>,
}

/// Scrapes every source of every provider in parallel
pub struct Scraper {
    providers: Vec<Arc<dyn MetricsSourceProvider>>,
    timeout: Duration,
    logger: StructuredLogger,
    metrics: CollectorMetrics,
}

impl Scraper {
    pub fn new(
        providers: Vec<Arc<dyn MetricsSourceProvider>>,
        timeout: Duration,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            providers,
            timeout,
            logger,
            metrics: CollectorMetrics::new(),
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Sources in registration order: provider order, then each provider's own order
    fn sources(&self) -> Vec<Arc<dyn MetricsSource>> {
        self.providers
            .iter()
            .flat_map(|provider| provider.get_metrics_sources())
            .collect()
    }

    /// Scrape all sources for the window `start..end` and merge their batches.
    ///
    /// Batches are merged in registration order regardless of completion
    /// order, so the first registered source wins a colliding key.
    pub async fn scrape(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ScrapeOutcome {
        let timeout = self.timeout;
        let handles: Vec<_> = self
            .sources()
            .into_iter()
            .map(|source| {
                let name = source.name().to_string();
                let handle = tokio::spawn(async move {
                    match tokio::time::timeout(timeout, source.scrape_metrics(start, end)).await {
                        Ok(result) => result,
                        Err(_) => Err(SourceError::Timeout {
                            source_name: source.name().to_string(),
                            timeout,
                        }),
                    }
                });
                (name, handle)
            })
            .collect();

        let mut outcome = ScrapeOutcome {
            batch: Batch::new(end),
            succeeded: 0,
            failed: Vec::new(),
        };

        for (name, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(SourceError::Scrape {
                    source_name: name.clone(),
                    reason: format!("scrape task aborted: {e}"),
                }),
            };

            match result {
                Ok(batch) => {
                    debug!(source = %name, sets = batch.len(), "Source scraped");
                    outcome.succeeded += 1;
                    if let Err(BatchError::KeyCollision(keys)) = outcome.batch.merge(batch) {
                        error!(
                            source = %name,
                            collisions = keys.len(),
                            first = %keys[0],
                            "Source reported keys already owned by another source"
                        );
                        self.metrics.add_key_collisions(keys.len() as u64);
                    }
                }
                Err(e) => {
                    self.logger.log_source_failed(&name, &e.to_string());
                    self.metrics.inc_source_failures(&name);
                    outcome.failed.push(name);
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ResourceKey, Set};
    use chrono::TimeZone;

    struct FixedSource {
        name: String,
        keys: Vec<ResourceKey>,
        delay: Duration,
        fail: bool,
    }

    impl FixedSource {
        fn new(name: &str, keys: Vec<ResourceKey>) -> Self {
            Self {
                name: name.to_string(),
                keys,
                delay: Duration::ZERO,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl MetricsSource for FixedSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn scrape_metrics(
            &self,
            _start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Batch, SourceError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(SourceError::Scrape {
                    source_name: self.name.clone(),
                    reason: "connection refused".into(),
                });
            }
            let mut batch = Batch::new(end);
            for key in &self.keys {
                let mut set = Set::for_key(key);
                set.set_int("cpu/usage", 1);
                set.set_label("source", self.name.as_str());
                batch.insert(key.clone(), set);
            }
            Ok(batch)
        }
    }

    struct StaticProvider {
        sources: Vec<Arc<dyn MetricsSource>>,
    }

    impl MetricsSourceProvider for StaticProvider {
        fn name(&self) -> &str {
            "static_provider"
        }

        fn get_metrics_sources(&self) -> Vec<Arc<dyn MetricsSource>> {
            self.sources.clone()
        }
    }

    fn scraper(sources: Vec<FixedSource>, timeout: Duration) -> Scraper {
        let provider = StaticProvider {
            sources: sources
                .into_iter()
                .map(|s| Arc::new(s) as Arc<dyn MetricsSource>)
                .collect(),
        };
        Scraper::new(vec![Arc::new(provider)], timeout, StructuredLogger::new("test-node"))
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 12, 1, 0).unwrap();
        (end - chrono::Duration::seconds(60), end)
    }

    #[tokio::test]
    async fn test_scrape_merges_disjoint_sources() {
        let scraper = scraper(
            vec![
                FixedSource::new("kubelet", vec![ResourceKey::pod_container("ns", "app-1", "web")]),
                FixedSource::new("nodes", vec![ResourceKey::node("node-a")]),
            ],
            Duration::from_secs(5),
        );
        let (start, end) = window();

        let outcome = scraper.scrape(start, end).await;

        assert_eq!(outcome.succeeded, 2);
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.batch.len(), 2);
        assert_eq!(outcome.batch.timestamp, end);
    }

    #[tokio::test]
    async fn test_failed_source_does_not_abort_cycle() {
        let mut broken = FixedSource::new("broken", vec![ResourceKey::node("node-b")]);
        broken.fail = true;
        let scraper = scraper(
            vec![
                broken,
                FixedSource::new("kubelet", vec![ResourceKey::pod("ns", "app-1")]),
            ],
            Duration::from_secs(5),
        );
        let (start, end) = window();

        let outcome = scraper.scrape(start, end).await;

        assert_eq!(outcome.failed, vec!["broken".to_string()]);
        assert_eq!(outcome.batch.len(), 1);
        assert!(outcome.batch.contains(&ResourceKey::pod("ns", "app-1")));
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let mut slow = FixedSource::new("slow", vec![ResourceKey::node("node-c")]);
        slow.delay = Duration::from_secs(10);
        let scraper = scraper(
            vec![slow, FixedSource::new("fast", vec![ResourceKey::node("node-a")])],
            Duration::from_millis(50),
        );
        let (start, end) = window();

        let outcome = scraper.scrape(start, end).await;

        assert_eq!(outcome.failed, vec!["slow".to_string()]);
        assert!(!outcome.batch.contains(&ResourceKey::node("node-c")));
        assert!(outcome.batch.contains(&ResourceKey::node("node-a")));
    }

    #[tokio::test]
    async fn test_collision_keeps_first_registered_source() {
        let key = ResourceKey::node("node-a");
        let mut first = FixedSource::new("first", vec![key.clone()]);
        // Finishes last but still wins
        first.delay = Duration::from_millis(30);
        let scraper = scraper(
            vec![first, FixedSource::new("second", vec![key.clone()])],
            Duration::from_secs(5),
        );
        let (start, end) = window();

        let outcome = scraper.scrape(start, end).await;

        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.batch.len(), 1);
        assert_eq!(outcome.batch.get(&key).unwrap().label("source"), Some("first"));
    }
}
