// src/results/store.rs
// Latest ingested results per analysis configuration

use super::model::{IngestReport, Issue};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Thread-safe map from configuration name to its latest ingestion.
///
/// Each analysis replaces the configuration's entry wholesale.
#[derive(Debug, Clone, Default)]
pub struct ResultsStore {
    inner: Arc<RwLock<HashMap<String, IngestReport>>>,
}

impl ResultsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `report` for `config`, returning the previous one
    pub fn replace(&self, config: &str, report: IngestReport) -> Option<IngestReport> {
        debug!(config, issues = report.hint_count(), "Replacing stored results");
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config.to_string(), report)
    }

    pub fn get(&self, config: &str) -> Option<IngestReport> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(config)
            .cloned()
    }

    /// Issues for one file, in document order
    pub fn issues_for_file(&self, config: &str, file: &Path) -> Vec<Issue> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(config)
            .and_then(|report| report.index.get(file))
            .map(<[Issue]>::to_vec)
            .unwrap_or_default()
    }

    /// Set an issue's `complete` flag. Returns false if either key is unknown.
    pub fn mark_complete(&self, config: &str, issue_id: &str, complete: bool) -> bool {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(config)
            .is_some_and(|report| report.mark_complete(issue_id, complete))
    }

    pub fn remove(&self, config: &str) -> Option<IngestReport> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(config)
    }

    pub fn configurations(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
