// src/scheduler/tracker.rs
// Per-file job state: the single authority on whether a file is busy

use super::job::{Job, JobId};
use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Current status of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    #[default]
    Idle,
    Queued,
    InProgress,
}

/// How the file's last job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    Completed,
    Failed,
    Cancelled,
}

/// Result of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still queued and will never start
    Dequeued(JobId),
    /// The running job was told to stop; the file goes idle when it does
    Signalled(JobId),
    NothingToCancel,
}

#[derive(Debug, Default)]
struct FileState {
    status: FileStatus,
    active_job: Option<JobId>,
    cancel: Option<CancellationToken>,
    cancel_requested: bool,
    /// Job waiting for the cancelled in-flight job to stop
    successor: Option<Job>,
    last: Option<Terminal>,
}

/// Read-only view of one file's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSnapshot {
    pub status: FileStatus,
    pub active_job: Option<JobId>,
    pub cancel_requested: bool,
    pub successor: Option<JobId>,
    pub last: Option<Terminal>,
}

/// State machine over files. No I/O; callers hold the lock around it.
///
/// ```text
/// Idle -> Queued -> InProgress -> (Completed | Failed | Cancelled) -> Idle
///           |                                    ^
///           +---------- cancel (dequeue) --------+
/// ```
#[derive(Debug, Default)]
pub struct FileStateTracker {
    files: HashMap<PathBuf, FileState>,
}

impl FileStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, file: &Path) -> FileStatus {
        self.files.get(file).map(|s| s.status).unwrap_or_default()
    }

    pub fn is_busy(&self, file: &Path) -> bool {
        self.status(file) != FileStatus::Idle
    }

    pub fn active_job(&self, file: &Path) -> Option<JobId> {
        self.files.get(file).and_then(|s| s.active_job)
    }

    /// True when `job` is the queued job for `file`
    pub fn is_queued_for(&self, file: &Path, job: JobId) -> bool {
        self.files
            .get(file)
            .is_some_and(|s| s.status == FileStatus::Queued && s.active_job == Some(job))
    }

    /// True while `job` is queued, running, or parked behind a running job
    pub fn is_live(&self, job: JobId) -> bool {
        self.files.values().any(|s| {
            s.active_job == Some(job) || s.successor.as_ref().is_some_and(|j| j.id == job)
        })
    }

    pub fn cancel_requested(&self, file: &Path) -> bool {
        self.files.get(file).is_some_and(|s| s.cancel_requested)
    }

    pub fn snapshot(&self, file: &Path) -> FileSnapshot {
        match self.files.get(file) {
            Some(state) => FileSnapshot {
                status: state.status,
                active_job: state.active_job,
                cancel_requested: state.cancel_requested,
                successor: state.successor.as_ref().map(|j| j.id),
                last: state.last,
            },
            None => FileSnapshot {
                status: FileStatus::Idle,
                active_job: None,
                cancel_requested: false,
                successor: None,
                last: None,
            },
        }
    }

    /// Files that are queued or running
    pub fn busy_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|(_, s)| s.status != FileStatus::Idle)
            .map(|(f, _)| f.clone())
            .collect();
        files.sort();
        files
    }

    pub fn mark_queued(&mut self, file: &Path, job: JobId) -> Result<()> {
        let state = self.files.entry(file.to_path_buf()).or_default();
        if state.status != FileStatus::Idle {
            return Err(OrchestratorError::AlreadyBusy {
                file: file.to_path_buf(),
                active: state.active_job.map(|j| j.0).unwrap_or_default(),
            });
        }
        state.status = FileStatus::Queued;
        state.active_job = Some(job);
        state.cancel = None;
        state.cancel_requested = false;
        Ok(())
    }

    pub fn mark_in_progress(&mut self, file: &Path, job: JobId, cancel: CancellationToken) -> Result<()> {
        let Some(state) = self.files.get_mut(file) else {
            return Err(invalid(file, format!("job {} was never queued", job)));
        };
        if state.status != FileStatus::Queued || state.active_job != Some(job) {
            return Err(invalid(
                file,
                format!("job {} is not the queued job (status {:?})", job, state.status),
            ));
        }
        state.status = FileStatus::InProgress;
        state.cancel = Some(cancel);
        Ok(())
    }

    /// Record how the running job ended and return the file to idle
    pub fn mark_terminal(&mut self, file: &Path, job: JobId, terminal: Terminal) -> Result<()> {
        let Some(state) = self.files.get_mut(file) else {
            return Err(invalid(file, format!("job {} is unknown", job)));
        };
        if state.status != FileStatus::InProgress || state.active_job != Some(job) {
            return Err(invalid(
                file,
                format!("job {} is not running (status {:?})", job, state.status),
            ));
        }
        state.status = FileStatus::Idle;
        state.active_job = None;
        state.cancel = None;
        state.cancel_requested = false;
        state.last = Some(terminal);
        Ok(())
    }

    /// Cancel whatever the file is doing.
    ///
    /// A queued job is released immediately (the caller removes it from the
    /// queue). A running job has its token cancelled and stays `InProgress`
    /// until `mark_terminal` observes it stop.
    pub fn cancel(&mut self, file: &Path) -> CancelOutcome {
        let Some(state) = self.files.get_mut(file) else {
            return CancelOutcome::NothingToCancel;
        };
        match (state.status, state.active_job) {
            (FileStatus::Queued, Some(job)) => {
                state.status = FileStatus::Idle;
                state.active_job = None;
                state.last = Some(Terminal::Cancelled);
                CancelOutcome::Dequeued(job)
            }
            (FileStatus::InProgress, Some(job)) => {
                if let Some(token) = &state.cancel {
                    token.cancel();
                }
                state.cancel_requested = true;
                CancelOutcome::Signalled(job)
            }
            _ => CancelOutcome::NothingToCancel,
        }
    }

    /// Park `job` to be queued once the running job stops, returning any job it displaces
    pub fn park_successor(&mut self, file: &Path, job: Job) -> Result<Option<Job>> {
        let state = self.files.entry(file.to_path_buf()).or_default();
        if state.status != FileStatus::InProgress {
            return Err(invalid(file, "no running job to follow".to_string()));
        }
        Ok(state.successor.replace(job))
    }

    pub fn take_successor(&mut self, file: &Path) -> Option<Job> {
        self.files.get_mut(file).and_then(|s| s.successor.take())
    }
}

fn invalid(file: &Path, detail: String) -> OrchestratorError {
    OrchestratorError::InvalidTransition {
        file: file.to_path_buf(),
        detail,
    }
}

/// Lexically normalize a path: drop `.` and resolve `..` without touching the filesystem
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `..` at the root stays at the root
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
