//! Bounded projection of user labels onto entity labels

use crate::metrics::labels;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

/// Which pod labels are copied onto metric entities
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LabelCopierConfig {
    /// Labels to copy, optionally renamed with `source=target`. Empty copies
    /// every label not excluded.
    pub include: Vec<String>,
    /// Labels never copied
    pub exclude: Vec<String>,
    /// Upper bound on labels copied onto a single entity
    pub max_labels: usize,
}

impl Default for LabelCopierConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            max_labels: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LabelCopier {
    include: BTreeMap<String, String>,
    exclude: HashSet<String>,
    max_labels: usize,
}

impl LabelCopier {
    pub fn new(config: &LabelCopierConfig) -> Self {
        let include = config
            .include
            .iter()
            .map(|entry| match entry.split_once('=') {
                Some((source, target)) => (source.trim().to_string(), target.trim().to_string()),
                None => (entry.trim().to_string(), entry.trim().to_string()),
            })
            .collect();

        Self {
            include,
            exclude: config.exclude.iter().cloned().collect(),
            max_labels: config.max_labels,
        }
    }

    /// Copy labels from `source` into `dest`.
    ///
    /// Keys are visited in sorted order so the subset kept under the count
    /// limit is stable across cycles. Keys owned by the collector's taxonomy
    /// are never written.
    pub fn copy(&self, source: &BTreeMap<String, String>, dest: &mut BTreeMap<String, String>) {
        let mut copied = 0;
        for (key, value) in source {
            if copied >= self.max_labels {
                break;
            }
            if self.exclude.contains(key) {
                continue;
            }
            let target = if self.include.is_empty() {
                key
            } else {
                match self.include.get(key) {
                    Some(target) => target,
                    None => continue,
                }
            };
            if labels::is_reserved(target) {
                continue;
            }
            dest.insert(target.clone(), value.clone());
            copied += 1;
        }
    }
}

impl Default for LabelCopier {
    fn default() -> Self {
        Self::new(&LabelCopierConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app".to_string(), "web".to_string()),
            ("pod_name".to_string(), "spoofed".to_string()),
            ("team".to_string(), "payments".to_string()),
            ("tier".to_string(), "frontend".to_string()),
        ])
    }

    #[test]
    fn test_copies_all_but_reserved_keys() {
        let copier = LabelCopier::default();
        let mut dest = BTreeMap::from([("pod_name".to_string(), "real".to_string())]);

        copier.copy(&source(), &mut dest);

        assert_eq!(dest["pod_name"], "real");
        assert_eq!(dest["app"], "web");
        assert_eq!(dest["team"], "payments");
        assert_eq!(dest["tier"], "frontend");
    }

    #[test]
    fn test_include_with_rename_and_exclude() {
        let copier = LabelCopier::new(&LabelCopierConfig {
            include: vec!["app=application".into(), "team".into(), "tier".into()],
            exclude: vec!["tier".into()],
            max_labels: 10,
        });
        let mut dest = BTreeMap::new();

        copier.copy(&source(), &mut dest);

        assert_eq!(dest.len(), 2);
        assert_eq!(dest["application"], "web");
        assert_eq!(dest["team"], "payments");
    }

    #[test]
    fn test_max_labels_is_stable() {
        let copier = LabelCopier::new(&LabelCopierConfig {
            max_labels: 2,
            ..Default::default()
        });
        let mut dest = BTreeMap::new();

        copier.copy(&source(), &mut dest);

        // reserved keys do not count against the limit
        assert_eq!(dest.keys().collect::<Vec<_>>(), vec!["app", "team"]);
    }

    #[test]
    fn test_rename_onto_reserved_key_is_skipped() {
        let copier = LabelCopier::new(&LabelCopierConfig {
            include: vec!["app=type".into()],
            ..Default::default()
        });
        let mut dest = BTreeMap::new();
        copier.copy(&source(), &mut dest);
        assert!(dest.is_empty());
    }
}
