//! Collector configuration and live reload
//!
//! Configuration comes from an optional file plus `COLLECTOR_*` environment
//! variables. A changed file is re-parsed and handed to a [`ConfigHandler`];
//! a file that fails to parse is reported and the running configuration is
//! kept.

use crate::metrics::descriptors;
use crate::observability::StructuredLogger;
use crate::processors::LabelCopierConfig;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to watch configuration file: {0}")]
    Watch(#[from] notify::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Cluster name stamped on the cluster entity
    pub cluster_name: String,

    /// Node name from Kubernetes downward API
    pub node_name: String,

    /// Seconds between scrape cycles
    pub collection_interval_secs: u64,

    /// Per-source scrape timeout in seconds
    pub scrape_timeout_secs: u64,

    /// API server port for health/metrics
    pub api_port: u16,

    /// Report the collector's own metrics as an entity
    pub internal_stats: bool,

    pub label_copier: LabelCopierConfig,

    /// Metric names rolled up container → pod → namespace → cluster
    pub aggregated_metrics: Vec<String>,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            cluster_name: "k8s-cluster".to_string(),
            node_name: default_node_name(),
            collection_interval_secs: 60,
            scrape_timeout_secs: 30,
            api_port: 8080,
            internal_stats: true,
            label_copier: LabelCopierConfig::default(),
            aggregated_metrics: descriptors::RESOURCE_METRICS
                .iter()
                .map(|m| m.name.to_string())
                .collect(),
        }
    }
}

impl CollectorConfig {
    /// Load from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: CollectorConfig = builder
            .add_source(
                config::Environment::with_prefix("COLLECTOR")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_name.trim().is_empty() {
            return Err(ConfigError::Invalid("cluster_name must not be empty".into()));
        }
        if self.collection_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "collection_interval_secs must be positive".into(),
            ));
        }
        if self.scrape_timeout_secs == 0 {
            return Err(ConfigError::Invalid("scrape_timeout_secs must be positive".into()));
        }
        if self.scrape_timeout_secs > self.collection_interval_secs {
            return Err(ConfigError::Invalid(format!(
                "scrape_timeout_secs ({}) exceeds collection_interval_secs ({})",
                self.scrape_timeout_secs, self.collection_interval_secs
            )));
        }
        Ok(())
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }
}

/// Receives every successfully parsed configuration
pub trait ConfigHandler: Send + Sync {
    fn handle(&self, config: CollectorConfig);
}

impl ConfigHandler for watch::Sender<CollectorConfig> {
    fn handle(&self, config: CollectorConfig) {
        self.send_if_modified(|current| {
            if *current == config {
                false
            } else {
                *current = config;
                true
            }
        });
    }
}

/// Reloads the configuration when told the file changed. The environment is
/// layered over the file exactly as at startup.
pub struct FileListener {
    handler: Arc<dyn ConfigHandler>,
    logger: StructuredLogger,
}

impl FileListener {
    pub fn new(handler: Arc<dyn ConfigHandler>, logger: StructuredLogger) -> Self {
        Self { handler, logger }
    }

    pub fn changed(&self, path: &Path) {
        match CollectorConfig::load(Some(path)) {
            Ok(config) => {
                self.logger.log_config_reloaded(&path.display().to_string());
                self.handler.handle(config);
            }
            Err(e) => {
                self.logger
                    .log_config_rejected(&path.display().to_string(), &e.to_string());
            }
        }
    }
}

/// Drives a [`FileListener`] from filesystem events on one file
pub struct ConfigWatcher {
    path: PathBuf,
    listener: FileListener,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>, listener: FileListener) -> Self {
        Self {
            path: path.into(),
            listener,
        }
    }

    /// Start watching. Returns a handle that stops watching when dropped.
    pub fn start(self) -> Result<ConfigWatchHandle, ConfigError> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        )?;

        // Watch the directory: editors and ConfigMap mounts replace the file
        // rather than writing it in place.
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(path = %self.path.display(), "Watching configuration file");

        let path = self.path;
        let file_name = path.file_name().map(|n| n.to_os_string());
        let listener = self.listener;

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    continue;
                }
                let touches_file = event.paths.iter().any(|p| {
                    p.file_name().map(|n| n.to_os_string()) == file_name || p.ends_with("..data")
                });
                if touches_file {
                    debug!(path = %path.display(), "Configuration file changed");
                    listener.changed(&path);
                }
            }
            debug!("Config watcher channel closed");
        });

        Ok(ConfigWatchHandle {
            _watcher: watcher,
            task,
        })
    }
}

pub struct ConfigWatchHandle {
    _watcher: RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for ConfigWatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        received: Mutex<Vec<CollectorConfig>>,
    }

    impl ConfigHandler for RecordingHandler {
        fn handle(&self, config: CollectorConfig) {
            self.received.lock().unwrap().push(config);
        }
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_config_defaults() {
        let config = CollectorConfig::default();
        assert_eq!(config.collection_interval(), Duration::from_secs(60));
        assert_eq!(config.scrape_timeout(), Duration::from_secs(30));
        assert_eq!(config.aggregated_metrics.len(), 6);
        assert!(config.aggregated_metrics.contains(&"cpu/request".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "collector.toml",
            r#"
cluster_name = "prod-east"
collection_interval_secs = 30
scrape_timeout_secs = 10

[label_copier]
include = ["app", "team=owner"]
max_labels = 5
"#,
        );

        let config = CollectorConfig::load(Some(&path)).unwrap();
        assert_eq!(config.cluster_name, "prod-east");
        assert_eq!(config.collection_interval_secs, 30);
        assert_eq!(config.label_copier.include, vec!["app", "team=owner"]);
        assert_eq!(config.label_copier.max_labels, 5);
        assert_eq!(config.api_port, 8080);
    }

    #[test]
    fn test_validation() {
        let mut config = CollectorConfig::default();
        config.scrape_timeout_secs = 120;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = CollectorConfig::default();
        config.collection_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = CollectorConfig::default();
        config.cluster_name = " ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_listener_dispatches_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "collector.toml", "cluster_name = \"staging\"\n");
        let handler = Arc::new(RecordingHandler::default());
        let listener = FileListener::new(handler.clone(), StructuredLogger::new("test-node"));

        listener.changed(&path);

        let received = handler.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].cluster_name, "staging");
    }

    #[test]
    fn test_listener_keeps_previous_config_on_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "collector.toml", "collection_interval_secs = \"soon\"\n");
        let (tx, rx) = watch::channel(CollectorConfig::default());
        let listener = FileListener::new(Arc::new(tx), StructuredLogger::new("test-node"));

        listener.changed(&path);

        assert!(!rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), CollectorConfig::default());
    }

    #[test]
    fn test_listener_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "collector.toml", "scrape_timeout_secs = 600\n");
        let handler = Arc::new(RecordingHandler::default());
        let listener = FileListener::new(handler.clone(), StructuredLogger::new("test-node"));

        listener.changed(&path);

        assert!(handler.received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_watch_sender_ignores_identical_config() {
        let (tx, rx) = watch::channel(CollectorConfig::default());
        tx.handle(CollectorConfig::default());
        assert!(!rx.has_changed().unwrap());

        let mut changed = CollectorConfig::default();
        changed.collection_interval_secs = 30;
        tx.handle(changed);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_env_overrides_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "collector.toml", "collection_interval_secs = 45\n");
        std::env::set_var("COLLECTOR_NODE_NAME", "env-node");
        std::env::set_var("COLLECTOR_INTERNAL_STATS", "false");

        let initial = CollectorConfig::load(Some(&path));

        let handler = Arc::new(RecordingHandler::default());
        let listener = FileListener::new(handler.clone(), StructuredLogger::new("test-node"));
        write_file(&dir, "collector.toml", "collection_interval_secs = 50\n");
        listener.changed(&path);

        std::env::remove_var("COLLECTOR_NODE_NAME");
        std::env::remove_var("COLLECTOR_INTERNAL_STATS");

        let initial = initial.unwrap();
        assert_eq!(initial.node_name, "env-node");
        assert!(!initial.internal_stats);
        assert_eq!(initial.collection_interval_secs, 45);

        let received = handler.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].node_name, "env-node");
        assert!(!received[0].internal_stats);
        assert_eq!(received[0].collection_interval_secs, 50);
    }
}
