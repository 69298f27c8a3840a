// src/error.rs
// Error taxonomy for the orchestration core

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the orchestrator library
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("process {executable} startup time exceeded {timeout_ms}ms")]
    StartupTimeout { executable: String, timeout_ms: u64 },

    #[error("failed to spawn {executable}: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process exited unexpectedly (exit code {code:?})")]
    ProcessExit { code: Option<i32> },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("backend returned HTTP {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("file {} is busy with job {active}", file.display())]
    AlreadyBusy { file: PathBuf, active: u64 },

    #[error("invalid state transition for {}: {detail}", file.display())]
    InvalidTransition { file: PathBuf, detail: String },

    #[error("task cancelled")]
    Cancelled,

    #[error("outcome of job #{job_id} was missed by a lagging subscriber")]
    OutcomeLost { job_id: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using OrchestratorError
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Cloneable discriminant of an [`OrchestratorError`], carried in job events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    StartupTimeout,
    ProcessExit,
    Parse,
    Schema,
    Network,
    AlreadyBusy,
    InvalidTransition,
    Cancelled,
    Io,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::StartupTimeout => "startup_timeout",
            Self::ProcessExit => "process_exit",
            Self::Parse => "parse",
            Self::Schema => "schema",
            Self::Network => "network",
            Self::AlreadyBusy => "already_busy",
            Self::InvalidTransition => "invalid_transition",
            Self::Cancelled => "cancelled",
            Self::Io => "io",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OrchestratorError {
    /// Classify the error for callers that only need to present status
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::StartupTimeout { .. } => ErrorKind::StartupTimeout,
            // A binary that cannot be spawned never started
            Self::Spawn { .. } => ErrorKind::StartupTimeout,
            Self::ProcessExit { .. } => ErrorKind::ProcessExit,
            Self::Parse(_) | Self::Yaml(_) => ErrorKind::Parse,
            Self::Schema(_) | Self::Json(_) => ErrorKind::Schema,
            Self::Network(_) | Self::Backend { .. } | Self::Http(_) => ErrorKind::Network,
            Self::AlreadyBusy { .. } => ErrorKind::AlreadyBusy,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(_) => ErrorKind::Io,
            Self::OutcomeLost { .. } | Self::Anyhow(_) => ErrorKind::Other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<tokio::task::JoinError> for OrchestratorError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            OrchestratorError::Cancelled
        } else {
            OrchestratorError::Anyhow(anyhow::anyhow!("task panicked: {}", err))
        }
    }
}

impl From<OrchestratorError> for String {
    fn from(err: OrchestratorError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error() {
        let err = OrchestratorError::Configuration("input is missing".to_string());
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("input is missing"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_startup_timeout_error() {
        let err = OrchestratorError::StartupTimeout {
            executable: "kantra".to_string(),
            timeout_ms: 500,
        };
        assert!(err.to_string().contains("kantra"));
        assert!(err.to_string().contains("500ms"));
        assert_eq!(err.kind(), ErrorKind::StartupTimeout);
    }

    #[test]
    fn test_spawn_error_classified_as_startup_failure() {
        let err = OrchestratorError::Spawn {
            executable: "/no/such/bin".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(err.kind(), ErrorKind::StartupTimeout);
        assert!(err.to_string().contains("/no/such/bin"));
    }

    #[test]
    fn test_already_busy_names_file_and_job() {
        let err = OrchestratorError::AlreadyBusy {
            file: PathBuf::from("/src/Main.java"),
            active: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("/src/Main.java"));
        assert!(msg.contains('7'));
        assert_eq!(err.kind(), ErrorKind::AlreadyBusy);
    }

    #[test]
    fn test_backend_error_is_network_kind() {
        let err = OrchestratorError::Backend {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn test_from_yaml_error() {
        let yaml_err = serde_yaml::from_str::<Vec<i32>>("{ not: [valid").unwrap_err();
        let err: OrchestratorError = yaml_err.into();
        assert!(matches!(err, OrchestratorError::Yaml(_)));
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<i32>("not json").unwrap_err();
        let err: OrchestratorError = json_err.into();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn test_cancelled() {
        let err = OrchestratorError::Cancelled;
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::ProcessExit.to_string(), "process_exit");
        assert_eq!(
            serde_json::to_string(&ErrorKind::StartupTimeout).unwrap(),
            "\"startup_timeout\""
        );
    }

    #[test]
    fn test_into_string() {
        let s: String = OrchestratorError::Network("connection refused".to_string()).into();
        assert!(s.contains("network error"));
    }
}
