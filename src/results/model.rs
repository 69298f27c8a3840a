// src/results/model.rs
// Normalized issue model produced by ingestion

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One ingested incident (a "hint")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    /// Absolute path of the affected file
    pub file: PathBuf,
    pub rule_id: String,
    pub ruleset_name: String,
    pub line_number: u32,
    pub source_snippet: String,
    pub variables: BTreeMap<String, String>,
    pub message: String,
    /// Violation category (mandatory, optional, potential)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Set by the user once the issue has been dealt with
    pub complete: bool,
}

/// Issues grouped by absolute file path, each bucket in document order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueIndex {
    by_file: BTreeMap<PathBuf, Vec<Issue>>,
}

impl IssueIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the file's bucket, creating it on first encounter
    pub fn push(&mut self, issue: Issue) {
        self.by_file.entry(issue.file.clone()).or_default().push(issue);
    }

    pub fn get(&self, file: &Path) -> Option<&[Issue]> {
        self.by_file.get(file).map(Vec::as_slice)
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.by_file.keys().map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &[Issue])> {
        self.by_file
            .iter()
            .map(|(path, issues)| (path.as_path(), issues.as_slice()))
    }

    /// Number of files with at least one issue
    pub fn len(&self) -> usize {
        self.by_file.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_file.is_empty()
    }

    /// Total issues across all files
    pub fn issue_count(&self) -> usize {
        self.by_file.values().map(Vec::len).sum()
    }

    pub(crate) fn find_mut(&mut self, issue_id: &str) -> Option<&mut Issue> {
        self.by_file
            .values_mut()
            .flat_map(|issues| issues.iter_mut())
            .find(|issue| issue.id == issue_id)
    }
}

/// An incident that could not be ingested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedIncident {
    pub ruleset_name: String,
    pub rule_id: String,
    /// Position of the incident within its violation
    pub position: usize,
    pub reason: String,
}

/// Output of one ingestion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Every issue in document order
    pub issues: Vec<Issue>,
    pub index: IssueIndex,
    pub skipped: Vec<SkippedIncident>,
}

impl IngestReport {
    pub fn hint_count(&self) -> usize {
        self.issues.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Flip an issue's `complete` flag. Returns false if the id is unknown.
    pub fn mark_complete(&mut self, issue_id: &str, complete: bool) -> bool {
        let Some(issue) = self.issues.iter_mut().find(|i| i.id == issue_id) else {
            return false;
        };
        issue.complete = complete;
        if let Some(indexed) = self.index.find_mut(issue_id) {
            indexed.complete = complete;
        }
        true
    }
}

/// Summary of an analysis run, for status displays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub configuration: String,
    pub output_location: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    pub hint_count: usize,
    pub classification_count: usize,
    pub skipped_incidents: usize,
    pub file_count: usize,
    pub executed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub active: bool,
}

impl AnalysisSummary {
    pub fn from_report(
        configuration: impl Into<String>,
        output_location: impl Into<PathBuf>,
        report: &IngestReport,
    ) -> Self {
        Self {
            configuration: configuration.into(),
            output_location: output_location.into(),
            executable: None,
            hint_count: report.hint_count(),
            classification_count: 0,
            skipped_incidents: report.skipped_count(),
            file_count: report.index.len(),
            executed_at: Utc::now(),
            duration_ms: None,
            active: true,
        }
    }
}
