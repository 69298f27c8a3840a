// src/scheduler/state.rs
// Pending queue, worker accounting, and the tracker, mutated under one lock

use super::job::{Job, JobClass, JobId, JobInfo, JobRequest};
use super::tracker::{normalize_path, CancelOutcome, FileStateTracker, FileStatus, Terminal};
use crate::config::env::DEFAULT_MAX_WORKERS;
use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What to do with a request for a file that already has a live job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Refuse the new request with `AlreadyBusy`
    #[default]
    Reject,
    /// Cancel the live job and run the new one in its place
    Replace,
}

impl BusyPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "reject" => Some(Self::Reject),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reject => "reject",
            Self::Replace => "replace",
        }
    }
}

impl std::fmt::Display for BusyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum concurrently running jobs per class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLimits {
    pub analyze: usize,
    pub fix: usize,
}

impl Default for WorkerLimits {
    fn default() -> Self {
        Self {
            analyze: DEFAULT_MAX_WORKERS,
            fix: DEFAULT_MAX_WORKERS,
        }
    }
}

impl WorkerLimits {
    pub fn for_class(&self, class: JobClass) -> usize {
        match class {
            JobClass::Analyze => self.analyze,
            JobClass::Fix => self.fix,
        }
    }
}

/// Returned by `submit`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    pub job_id: JobId,
    /// Job cancelled to make way for this one
    pub replaced: Option<JobId>,
}

/// Counts at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerSnapshot {
    pub pending: usize,
    pub active_analyze: usize,
    pub active_fix: usize,
}

impl SchedulerSnapshot {
    pub fn active(&self, class: JobClass) -> usize {
        match class {
            JobClass::Analyze => self.active_analyze,
            JobClass::Fix => self.active_fix,
        }
    }
}

/// Outcome of `SchedulerState::submit`, for the caller to turn into events
#[derive(Debug)]
pub(crate) struct Submission {
    pub receipt: SubmitReceipt,
    /// Set when the new job entered the queue right away
    pub queued: Option<JobInfo>,
    /// Jobs dropped before they ever started
    pub discarded: Vec<JobInfo>,
}

/// A job taken off the queue, ready to dispatch
#[derive(Debug)]
pub(crate) struct Admitted {
    pub job: Job,
    pub cancel: CancellationToken,
}

/// Outcome of `SchedulerState::cancel`
#[derive(Debug)]
pub(crate) struct Cancellation {
    pub outcome: CancelOutcome,
    pub discarded: Vec<JobInfo>,
}

/// All mutable scheduling state. Every method runs to completion under the
/// scheduler's lock, so reads and writes of tracker and queue never interleave.
#[derive(Debug)]
pub struct SchedulerState {
    tracker: FileStateTracker,
    pending: VecDeque<Job>,
    active: [usize; 2],
    limits: WorkerLimits,
    policy: BusyPolicy,
    next_id: u64,
    closed: bool,
}

impl SchedulerState {
    pub fn new(limits: WorkerLimits, policy: BusyPolicy) -> Self {
        Self {
            tracker: FileStateTracker::new(),
            pending: VecDeque::new(),
            active: [0; 2],
            limits,
            policy,
            next_id: 1,
            closed: false,
        }
    }

    pub fn tracker(&self) -> &FileStateTracker {
        &self.tracker
    }

    pub fn policy(&self) -> BusyPolicy {
        self.policy
    }

    pub fn active(&self, class: JobClass) -> usize {
        self.active[slot(class)]
    }

    pub fn pending(&self) -> impl Iterator<Item = &Job> {
        self.pending.iter()
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            pending: self.pending.len(),
            active_analyze: self.active(JobClass::Analyze),
            active_fix: self.active(JobClass::Fix),
        }
    }

    fn allocate(&mut self, request: JobRequest) -> Job {
        let id = JobId(self.next_id);
        self.next_id += 1;
        Job {
            id,
            class: request.class,
            file: normalize_path(&request.file),
            payload: request.payload,
            name: request.name,
        }
    }

    pub(crate) fn submit(&mut self, request: JobRequest) -> Result<Submission> {
        if self.closed {
            return Err(OrchestratorError::Cancelled);
        }
        let file = normalize_path(&request.file);

        match (self.tracker.status(&file), self.policy) {
            (FileStatus::Idle, _) => {
                let job = self.allocate(request);
                self.tracker.mark_queued(&job.file, job.id)?;
                let info = job.info();
                self.pending.push_back(job);
                Ok(Submission {
                    receipt: SubmitReceipt {
                        job_id: info.id,
                        replaced: None,
                    },
                    queued: Some(info),
                    discarded: Vec::new(),
                })
            }
            (_, BusyPolicy::Reject) => Err(OrchestratorError::AlreadyBusy {
                active: self.tracker.active_job(&file).map(|j| j.0).unwrap_or_default(),
                file,
            }),
            (FileStatus::Queued, BusyPolicy::Replace) => {
                let CancelOutcome::Dequeued(old_id) = self.tracker.cancel(&file) else {
                    return Err(OrchestratorError::InvalidTransition {
                        file,
                        detail: "queued file has no queued job".to_string(),
                    });
                };
                let position = self.pending.iter().position(|j| j.id == old_id);
                let old = position.and_then(|p| self.pending.remove(p));

                let job = self.allocate(request);
                self.tracker.mark_queued(&job.file, job.id)?;
                let info = job.info();
                // Take the replaced job's place in line
                match position {
                    Some(p) => self.pending.insert(p, job),
                    None => self.pending.push_back(job),
                }
                debug!(file = %file.display(), old = %old_id, new = %info.id, "Replaced queued job");
                Ok(Submission {
                    receipt: SubmitReceipt {
                        job_id: info.id,
                        replaced: Some(old_id),
                    },
                    queued: Some(info),
                    discarded: old.map(|j| j.info()).into_iter().collect(),
                })
            }
            (FileStatus::InProgress, BusyPolicy::Replace) => {
                let CancelOutcome::Signalled(running) = self.tracker.cancel(&file) else {
                    return Err(OrchestratorError::InvalidTransition {
                        file,
                        detail: "running file has no running job".to_string(),
                    });
                };
                let job = self.allocate(request);
                let job_id = job.id;
                let displaced = self.tracker.park_successor(&file, job)?;
                debug!(
                    file = %file.display(),
                    running = %running,
                    successor = %job_id,
                    "Cancelling running job for replacement"
                );
                Ok(Submission {
                    receipt: SubmitReceipt {
                        job_id,
                        replaced: Some(running),
                    },
                    queued: None,
                    discarded: displaced.map(|j| j.info()).into_iter().collect(),
                })
            }
        }
    }

    /// One scheduling pass: per class, admit queued jobs in FIFO order until
    /// the class is at its cap, skipping jobs whose file is busy elsewhere.
    pub(crate) fn admit(&mut self) -> Vec<Admitted> {
        let mut admitted = Vec::new();
        if self.closed {
            return admitted;
        }

        for class in JobClass::ALL {
            let cap = self.limits.for_class(class);
            let mut i = 0;
            while i < self.pending.len() && self.active(class) < cap {
                let job = &self.pending[i];
                if job.class != class || !self.tracker.is_queued_for(&job.file, job.id) {
                    i += 1;
                    continue;
                }
                let Some(job) = self.pending.remove(i) else {
                    break;
                };
                let cancel = CancellationToken::new();
                if let Err(e) = self.tracker.mark_in_progress(&job.file, job.id, cancel.clone()) {
                    warn!(job_id = %job.id, error = %e, "Dropping job that could not start");
                    continue;
                }
                self.active[slot(class)] += 1;
                admitted.push(Admitted { job, cancel });
            }
        }

        admitted
    }

    /// Release the job's worker slot and return its file to idle. Returns the
    /// parked successor, now queued, if there was one.
    pub(crate) fn complete(&mut self, job: &Job, terminal: Terminal) -> Option<JobInfo> {
        let count = &mut self.active[slot(job.class)];
        *count = count.saturating_sub(1);

        if let Err(e) = self.tracker.mark_terminal(&job.file, job.id, terminal) {
            warn!(job_id = %job.id, error = %e, "Completion for a job the tracker does not know");
        }

        let successor = self.tracker.take_successor(&job.file)?;
        if self.closed {
            return None;
        }
        match self.tracker.mark_queued(&successor.file, successor.id) {
            Ok(()) => {
                let info = successor.info();
                self.pending.push_back(successor);
                Some(info)
            }
            Err(e) => {
                warn!(job_id = %successor.id, error = %e, "Could not queue successor");
                None
            }
        }
    }

    pub(crate) fn cancel(&mut self, file: &Path) -> Cancellation {
        let file = normalize_path(file);
        let outcome = self.tracker.cancel(&file);
        let mut discarded = Vec::new();

        match outcome {
            CancelOutcome::Dequeued(id) => {
                if let Some(p) = self.pending.iter().position(|j| j.id == id)
                    && let Some(job) = self.pending.remove(p)
                {
                    discarded.push(job.info());
                }
            }
            CancelOutcome::Signalled(_) => {
                if let Some(successor) = self.tracker.take_successor(&file) {
                    discarded.push(successor.info());
                }
            }
            CancelOutcome::NothingToCancel => {}
        }

        Cancellation { outcome, discarded }
    }

    /// Stop accepting work and cancel everything queued or running
    pub(crate) fn close(&mut self) -> Vec<Cancellation> {
        self.closed = true;
        let files = self.tracker.busy_files();
        files.iter().map(|file| self.cancel(file)).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn slot(class: JobClass) -> usize {
    match class {
        JobClass::Analyze => 0,
        JobClass::Fix => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn analyze(file: &str) -> JobRequest {
        JobRequest::analyze(file, serde_json::Value::Null)
    }

    fn fix(file: &str) -> JobRequest {
        JobRequest::fix(file, serde_json::Value::Null)
    }

    #[test]
    fn test_busy_policy_parse() {
        assert_eq!(BusyPolicy::parse(" Replace "), Some(BusyPolicy::Replace));
        assert_eq!(BusyPolicy::parse("reject"), Some(BusyPolicy::Reject));
        assert_eq!(BusyPolicy::parse("queue"), None);
        assert_eq!(BusyPolicy::default(), BusyPolicy::Reject);
    }

    #[test]
    fn test_ids_increase() {
        let mut state = SchedulerState::new(WorkerLimits::default(), BusyPolicy::Reject);
        let a = state.submit(analyze("/w/a")).unwrap().receipt.job_id;
        let b = state.submit(fix("/w/b")).unwrap().receipt.job_id;
        assert!(a < b);
    }

    #[test]
    fn test_admit_respects_caps() {
        let mut state = SchedulerState::new(WorkerLimits { analyze: 2, fix: 1 }, BusyPolicy::Reject);
        for i in 0..5 {
            state.submit(analyze(&format!("/w/a{}", i))).unwrap();
        }
        state.submit(fix("/w/f0")).unwrap();
        state.submit(fix("/w/f1")).unwrap();

        let admitted = state.admit();
        assert_eq!(admitted.len(), 3);
        assert_eq!(state.active(JobClass::Analyze), 2);
        assert_eq!(state.active(JobClass::Fix), 1);
        assert_eq!(state.snapshot().pending, 4);

        // FIFO within a class
        let files: Vec<_> = admitted.iter().map(|a| a.job.file.clone()).collect();
        assert_eq!(
            files,
            vec![PathBuf::from("/w/a0"), PathBuf::from("/w/a1"), PathBuf::from("/w/f0")]
        );

        // Nothing more until a slot frees
        assert!(state.admit().is_empty());
        state.complete(&admitted[0].job, Terminal::Completed);
        let next = state.admit();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].job.file, PathBuf::from("/w/a2"));
    }

    #[test]
    fn test_reject_policy() {
        let mut state = SchedulerState::new(WorkerLimits::default(), BusyPolicy::Reject);
        let first = state.submit(fix("/w/A.java")).unwrap().receipt.job_id;
        let err = state.submit(analyze("/w/./A.java")).unwrap_err();
        match err {
            OrchestratorError::AlreadyBusy { active, file } => {
                assert_eq!(active, first.0);
                assert_eq!(file, PathBuf::from("/w/A.java"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_replace_queued_keeps_position() {
        let mut state = SchedulerState::new(WorkerLimits { analyze: 0, fix: 0 }, BusyPolicy::Replace);
        state.submit(fix("/w/A")).unwrap();
        let old = state.submit(fix("/w/B")).unwrap().receipt.job_id;
        state.submit(fix("/w/C")).unwrap();

        let sub = state.submit(fix("/w/B")).unwrap();
        assert_eq!(sub.receipt.replaced, Some(old));
        assert_eq!(sub.discarded.len(), 1);
        assert_eq!(sub.discarded[0].id, old);

        let order: Vec<_> = state.pending().map(|j| j.id).collect();
        assert_eq!(order.len(), 3);
        assert_eq!(order[1], sub.receipt.job_id);
    }

    #[test]
    fn test_replace_running_parks_successor() {
        let mut state = SchedulerState::new(WorkerLimits::default(), BusyPolicy::Replace);
        state.submit(fix("/w/A")).unwrap();
        let running = state.admit().remove(0);

        let sub = state.submit(fix("/w/A")).unwrap();
        assert_eq!(sub.receipt.replaced, Some(running.job.id));
        assert!(sub.queued.is_none());
        assert!(running.cancel.is_cancelled());
        // The new job is not admissible while the old one is still running
        assert!(state.admit().is_empty());
        assert_eq!(state.tracker().status(Path::new("/w/A")), FileStatus::InProgress);

        let requeued = state.complete(&running.job, Terminal::Cancelled).unwrap();
        assert_eq!(requeued.id, sub.receipt.job_id);
        let next = state.admit();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].job.id, sub.receipt.job_id);
    }

    #[test]
    fn test_cancel_queued_and_running() {
        let mut state = SchedulerState::new(WorkerLimits { analyze: 1, fix: 1 }, BusyPolicy::Reject);
        state.submit(fix("/w/A")).unwrap();
        let queued = state.submit(fix("/w/B")).unwrap().receipt.job_id;
        let running = state.admit().remove(0);

        let c = state.cancel(Path::new("/w/B"));
        assert_eq!(c.outcome, CancelOutcome::Dequeued(queued));
        assert_eq!(c.discarded[0].id, queued);
        assert_eq!(state.snapshot().pending, 0);

        let c = state.cancel(Path::new("/w/A"));
        assert_eq!(c.outcome, CancelOutcome::Signalled(running.job.id));
        assert!(running.cancel.is_cancelled());
        assert_eq!(state.active(JobClass::Fix), 1);

        state.complete(&running.job, Terminal::Cancelled);
        assert_eq!(state.active(JobClass::Fix), 0);
        assert_eq!(state.tracker().status(Path::new("/w/A")), FileStatus::Idle);

        assert_eq!(
            state.cancel(Path::new("/w/A")).outcome,
            CancelOutcome::NothingToCancel
        );
    }

    #[test]
    fn test_close_rejects_and_cancels() {
        let mut state = SchedulerState::new(WorkerLimits { analyze: 1, fix: 1 }, BusyPolicy::Reject);
        state.submit(analyze("/w/A")).unwrap();
        state.submit(analyze("/w/B")).unwrap();
        let running = state.admit().remove(0);

        let cancellations = state.close();
        assert_eq!(cancellations.len(), 2);
        assert!(running.cancel.is_cancelled());
        assert_eq!(state.snapshot().pending, 0);
        assert!(state.admit().is_empty());
        assert!(matches!(
            state.submit(analyze("/w/C")),
            Err(OrchestratorError::Cancelled)
        ));
    }
}
