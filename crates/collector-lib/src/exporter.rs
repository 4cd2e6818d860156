//! Hand-off point for enriched batches

use crate::metrics::{Batch, EntityKind};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, enabled, info, Level};

/// Receives one enriched batch per cycle
#[async_trait]
pub trait Exporter: Send + Sync {
    fn name(&self) -> &str;

    async fn export(&self, batch: &Batch) -> Result<()>;
}

/// Writes batches to the log: one JSON line per set at debug level and a
/// per-kind summary at info level.
#[derive(Debug, Default, Clone)]
pub struct LogExporter;

impl LogExporter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Exporter for LogExporter {
    fn name(&self) -> &str {
        "log_exporter"
    }

    async fn export(&self, batch: &Batch) -> Result<()> {
        if enabled!(Level::DEBUG) {
            for (key, set) in &batch.sets {
                let line = serde_json::to_string(set)
                    .with_context(|| format!("Failed to serialize set {key}"))?;
                debug!(key = %key, set = %line, "Exported set");
            }
        }

        let counts: Vec<String> = EntityKind::ALL
            .iter()
            .map(|kind| (kind, batch.count_of_kind(*kind)))
            .filter(|(_, count)| *count > 0)
            .map(|(kind, count)| format!("{kind}={count}"))
            .collect();

        info!(
            timestamp = %batch.timestamp.to_rfc3339(),
            sets = batch.len(),
            kinds = %counts.join(","),
            "Exported batch"
        );
        Ok(())
    }
}
