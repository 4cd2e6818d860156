//! Scrape cycle scheduling
//!
//! One cycle runs to completion (scrape, merge, process, export) before the
//! next tick is taken. A new configuration is picked up between cycles.

use crate::config::CollectorConfig;
use crate::exporter::Exporter;
use crate::health::{components, HealthRegistry};
use crate::observability::{CollectorMetrics, StructuredLogger};
use crate::processors::ProcessorChain;
use crate::sources::{MetricsSourceProvider, Scraper};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Builds the processor chain for a configuration
pub type ChainFactory = Box<dyn Fn(&CollectorConfig) -> ProcessorChain + Send + Sync>;

/// What happened in one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub sets: usize,
    pub sources_succeeded: usize,
    pub sources_failed: usize,
    pub dropped: bool,
    pub exported: bool,
}

pub struct CollectionLoop {
    scraper: Scraper,
    chain: ProcessorChain,
    chain_factory: ChainFactory,
    exporter: Arc<dyn Exporter>,
    config: CollectorConfig,
    config_rx: Option<watch::Receiver<CollectorConfig>>,
    health: Option<HealthRegistry>,
    logger: StructuredLogger,
    metrics: CollectorMetrics,
}

impl CollectionLoop {
    /// Run until a shutdown signal arrives
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.collection_interval_secs,
            sources = ?self.scraper.provider_names(),
            stages = ?self.chain.names(),
            "Starting collection loop"
        );

        let mut config_rx = self.config_rx.take();
        let mut ticker = cycle_ticker(self.config.collection_interval());
        let mut cycle_count = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_cycle(Utc::now()).await;
                    cycle_count += 1;
                    debug!(cycle = cycle_count, report = ?report, "Cycle finished");
                }
                config = next_config(&mut config_rx) => {
                    let interval_changed =
                        config.collection_interval_secs != self.config.collection_interval_secs;
                    self.apply_config(config);
                    if interval_changed {
                        ticker = ticker_after(self.config.collection_interval());
                    }
                }
                _ = shutdown.recv() => {
                    info!(cycles = cycle_count, "Shutting down collection loop");
                    break;
                }
            }
        }
    }

    /// Scrape, process and export one batch collected at `now`
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let started = Instant::now();
        let window = chrono::Duration::from_std(self.config.collection_interval())
            .unwrap_or_else(|_| chrono::Duration::zero());

        let outcome = self.scraper.scrape(now - window, now).await;
        let mut report = CycleReport {
            sets: 0,
            sources_succeeded: outcome.succeeded,
            sources_failed: outcome.failed.len(),
            dropped: false,
            exported: false,
        };
        self.record_scrape_health(&report, &outcome.failed).await;

        let batch = match self.chain.run(outcome.batch) {
            Ok(batch) => {
                self.set_health(components::PROCESSORS, None).await;
                batch
            }
            Err(e) => {
                self.logger.log_cycle_dropped(&e.to_string());
                self.metrics.inc_cycles_dropped();
                self.set_health(components::PROCESSORS, Some(e.to_string())).await;
                report.dropped = true;
                return report;
            }
        };
        report.sets = batch.len();

        match self.exporter.export(&batch).await {
            Ok(()) => {
                report.exported = true;
                self.set_health(components::EXPORTER, None).await;
            }
            Err(e) => {
                warn!(exporter = self.exporter.name(), error = %e, "Export failed");
                self.set_health(components::EXPORTER, Some(e.to_string())).await;
            }
        }

        let elapsed = started.elapsed();
        self.metrics.observe_cycle_latency(elapsed.as_secs_f64());
        self.metrics.set_sets_exported(report.sets);
        self.logger
            .log_cycle_complete(report.sets, report.sources_succeeded, elapsed.as_millis());

        report
    }

    fn apply_config(&mut self, config: CollectorConfig) {
        info!(
            interval_secs = config.collection_interval_secs,
            scrape_timeout_secs = config.scrape_timeout_secs,
            "Applying new configuration"
        );
        self.chain = (self.chain_factory)(&config);
        self.scraper.set_timeout(config.scrape_timeout());
        self.config = config;
    }

    async fn record_scrape_health(&self, report: &CycleReport, failed: &[String]) {
        let Some(health) = &self.health else {
            return;
        };
        if failed.is_empty() {
            health.set_healthy(components::SCRAPER).await;
        } else if report.sources_succeeded == 0 {
            let reason = format!("all sources failed: {}", failed.join(", "));
            health.set_unhealthy(components::SCRAPER, reason).await;
        } else {
            let reason = format!("sources failed: {}", failed.join(", "));
            health.set_degraded(components::SCRAPER, reason).await;
        }
    }

    /// `None` marks the component healthy, `Some(reason)` degraded
    async fn set_health(&self, component: &str, problem: Option<String>) {
        if let Some(health) = &self.health {
            match problem {
                None => health.set_healthy(component).await,
                Some(reason) => health.set_degraded(component, reason).await,
            }
        }
    }
}

fn cycle_ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Like [`cycle_ticker`] but without the immediate first tick
fn ticker_after(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Resolves with each new configuration; never resolves once the sender is gone
async fn next_config(rx: &mut Option<watch::Receiver<CollectorConfig>>) -> CollectorConfig {
    if let Some(receiver) = rx.as_mut() {
        if receiver.changed().await.is_ok() {
            return receiver.borrow_and_update().clone();
        }
        debug!("Configuration channel closed");
        *rx = None;
    }
    std::future::pending().await
}

/// Builder for creating the collection loop
pub struct CollectionLoopBuilder {
    providers: Vec<Arc<dyn MetricsSourceProvider>>,
    chain_factory: Option<ChainFactory>,
    exporter: Option<Arc<dyn Exporter>>,
    config: CollectorConfig,
    config_rx: Option<watch::Receiver<CollectorConfig>>,
    health: Option<HealthRegistry>,
}

impl CollectionLoopBuilder {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            chain_factory: None,
            exporter: None,
            config: CollectorConfig::default(),
            config_rx: None,
            health: None,
        }
    }

    /// Register a source provider; providers are scraped in registration order
    pub fn provider(mut self, provider: Arc<dyn MetricsSourceProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn chain_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&CollectorConfig) -> ProcessorChain + Send + Sync + 'static,
    {
        self.chain_factory = Some(Box::new(factory));
        self
    }

    pub fn exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn config(mut self, config: CollectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Pick up configuration changes between cycles
    pub fn config_updates(mut self, rx: watch::Receiver<CollectorConfig>) -> Self {
        self.config_rx = Some(rx);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<CollectionLoop> {
        if self.providers.is_empty() {
            anyhow::bail!("At least one metrics source provider is required");
        }
        let chain_factory = self
            .chain_factory
            .ok_or_else(|| anyhow::anyhow!("Processor chain factory is required"))?;
        let exporter = self
            .exporter
            .ok_or_else(|| anyhow::anyhow!("Exporter is required"))?;
        self.config.validate()?;

        let logger = StructuredLogger::new(self.config.node_name.as_str());
        let scraper = Scraper::new(self.providers, self.config.scrape_timeout(), logger.clone());
        let chain = chain_factory(&self.config);

        Ok(CollectionLoop {
            scraper,
            chain,
            chain_factory,
            exporter,
            config: self.config,
            config_rx: self.config_rx,
            health: self.health,
            logger,
            metrics: CollectorMetrics::new(),
        })
    }
}

impl Default for CollectionLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
