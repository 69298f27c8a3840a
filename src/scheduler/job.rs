// src/scheduler/job.rs
// Job identity, requests, and the outcomes reported for them

use crate::backend::FixOutput;
use crate::error::{ErrorKind, OrchestratorError};
use crate::results::AnalysisSummary;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Process-unique job identifier, increasing in submission order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobClass {
    Analyze,
    Fix,
}

impl JobClass {
    /// Scheduling order within one pass
    pub const ALL: [JobClass; 2] = [JobClass::Analyze, JobClass::Fix];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::Fix => "fix",
        }
    }
}

impl std::fmt::Display for JobClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller hands to `submit`
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub class: JobClass,
    pub file: PathBuf,
    /// Executor-specific payload
    pub payload: serde_json::Value,
    pub name: Option<String>,
}

impl JobRequest {
    pub fn new(class: JobClass, file: impl Into<PathBuf>, payload: serde_json::Value) -> Self {
        Self {
            class,
            file: file.into(),
            payload,
            name: None,
        }
    }

    pub fn analyze(file: impl Into<PathBuf>, payload: serde_json::Value) -> Self {
        Self::new(JobClass::Analyze, file, payload)
    }

    pub fn fix(file: impl Into<PathBuf>, payload: serde_json::Value) -> Self {
        Self::new(JobClass::Fix, file, payload)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// An accepted unit of work. Immutable once created.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub class: JobClass,
    /// Normalized path, the tracker key
    pub file: PathBuf,
    pub payload: serde_json::Value,
    pub name: Option<String>,
}

impl Job {
    pub fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            class: self.class,
            file: self.file.clone(),
            name: self.name.clone(),
        }
    }

    /// Name for logs: the label if one was given, else the file
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.file.display().to_string(),
        }
    }
}

/// Job identity without the payload, as carried in events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub class: JobClass,
    pub file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// What a successful job produced
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum JobOutput {
    Analysis(AnalysisSummary),
    Fix(Box<FixOutput>),
    /// Free-form output from executors outside this crate
    Json(serde_json::Value),
}

/// Why a job failed, in a form that can be cloned into events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&OrchestratorError> for JobFailure {
    fn from(err: &OrchestratorError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Terminal outcome of a job. Cancellation is its own outcome, not a failure.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed(JobOutput),
    Failed(JobFailure),
    Cancelled,
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Lifecycle notifications broadcast by the scheduler
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// Entered the pending queue
    Queued(JobInfo),
    /// Admitted and dispatched to its executor
    Started(JobInfo),
    /// Reached a terminal outcome (including removal from the queue)
    Finished { job: JobInfo, outcome: JobOutcome },
}

impl JobEvent {
    pub fn job(&self) -> &JobInfo {
        match self {
            Self::Queued(job) | Self::Started(job) => job,
            Self::Finished { job, .. } => job,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_display_and_order() {
        assert_eq!(JobId(7).to_string(), "#7");
        assert!(JobId(1) < JobId(2));
    }

    #[test]
    fn test_request_builders() {
        let req = JobRequest::fix("/w/A.java", serde_json::json!({})).with_name("fix A");
        assert_eq!(req.class, JobClass::Fix);
        assert_eq!(req.name.as_deref(), Some("fix A"));
        assert_eq!(JobRequest::analyze("/w", serde_json::Value::Null).class, JobClass::Analyze);
    }

    #[test]
    fn test_failure_from_error() {
        let failure = JobFailure::from(&OrchestratorError::ProcessExit { code: Some(3) });
        assert_eq!(failure.kind, ErrorKind::ProcessExit);
        assert!(failure.message.contains("3"));
        assert!(failure.to_string().starts_with("process_exit: "));
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let outcome = JobOutcome::Failed(JobFailure {
            kind: ErrorKind::Network,
            message: "refused".to_string(),
        });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["detail"]["kind"], "network");

        let json = serde_json::to_value(JobOutcome::Cancelled).unwrap();
        assert_eq!(json["outcome"], "cancelled");
    }
}
