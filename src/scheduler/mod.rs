//! Job queue and scheduler
//!
//! Accepts Analyze and Fix jobs keyed by file, runs at most one job per file,
//! and bounds concurrency per class. Scheduling is event driven: every
//! submit, cancel, and completion runs a pass immediately, and
//! [`Scheduler::run`] adds a low-frequency safety-net tick.
//!
//! ```text
//! submit ──► pending queue ──► tick() ──► executor task ──► finish()
//!                 ▲                                            │
//!                 └──────────── successor / next tick ◄────────┘
//! ```
//!
//! All queue and tracker mutation happens inside [`SchedulerState`] under a
//! single mutex that is never held across an `.await`.
//!
//! Subscribers see each job's events in lifecycle order: `Queued`, then
//! `Started`, then `Finished`. Queued and Finished are sent under that mutex.

mod job;
mod state;
mod tracker;

pub use job::{
    Job, JobClass, JobEvent, JobFailure, JobId, JobInfo, JobOutcome, JobOutput, JobRequest,
};
pub use state::{BusyPolicy, SchedulerSnapshot, SchedulerState, SubmitReceipt, WorkerLimits};
pub use tracker::{
    normalize_path, CancelOutcome, FileSnapshot, FileStateTracker, FileStatus, Terminal,
};

use crate::config::EnvConfig;
use crate::config::env::DEFAULT_SAFETY_TICK_MS;
use crate::error::Result;
use async_trait::async_trait;
use state::{Admitted, Cancellation};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Buffered events per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 256;

/// Runs one class of jobs.
///
/// Implementations must return promptly once `cancel` fires; the scheduler
/// reports the job as cancelled when it does.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job, cancel: CancellationToken) -> Result<JobOutput>;
}

/// Scheduler construction options
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub limits: WorkerLimits,
    pub policy: BusyPolicy,
    pub safety_tick: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            limits: WorkerLimits::default(),
            policy: BusyPolicy::default(),
            safety_tick: Duration::from_millis(DEFAULT_SAFETY_TICK_MS),
        }
    }
}

impl From<&EnvConfig> for SchedulerOptions {
    fn from(config: &EnvConfig) -> Self {
        Self {
            limits: config.worker_limits(),
            policy: config.busy_policy,
            safety_tick: config.safety_tick,
        }
    }
}

struct Inner {
    state: Mutex<SchedulerState>,
    analyze: Arc<dyn JobExecutor>,
    fix: Arc<dyn JobExecutor>,
    events: broadcast::Sender<JobEvent>,
    wake: Notify,
    safety_tick: Duration,
}

/// Cheaply cloneable handle to one scheduler instance
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        options: SchedulerOptions,
        analyze: Arc<dyn JobExecutor>,
        fix: Arc<dyn JobExecutor>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        info!(
            analyze_workers = options.limits.analyze,
            fix_workers = options.limits.fix,
            policy = %options.policy,
            "Scheduler created"
        );
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SchedulerState::new(options.limits, options.policy)),
                analyze,
                fix,
                events,
                wake: Notify::new(),
                safety_tick: options.safety_tick,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    fn emit_cancelled(&self, jobs: Vec<JobInfo>) {
        for job in jobs {
            self.emit(JobEvent::Finished {
                job,
                outcome: JobOutcome::Cancelled,
            });
        }
    }

    fn executor(&self, class: JobClass) -> Arc<dyn JobExecutor> {
        match class {
            JobClass::Analyze => self.inner.analyze.clone(),
            JobClass::Fix => self.inner.fix.clone(),
        }
    }

    /// Lifecycle events for every job from now on
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Queue a job. Fails with `AlreadyBusy` when the file has a live job and
    /// the policy is `Reject`.
    pub fn submit(&self, request: JobRequest) -> Result<SubmitReceipt> {
        let class = request.class;
        let receipt = {
            let mut state = self.lock();
            let submission = match state.submit(request) {
                Ok(submission) => submission,
                Err(e) => {
                    debug!(class = %class, error = %e, "Submission refused");
                    return Err(e);
                }
            };

            // Sent under the lock so no tick can start the job first
            self.emit_cancelled(submission.discarded);
            if let Some(job) = submission.queued {
                debug!(job_id = %job.id, class = %job.class, file = %job.file.display(), "Job queued");
                self.emit(JobEvent::Queued(job));
            }
            submission.receipt
        };

        self.tick();
        Ok(receipt)
    }

    /// Cancel the file's queued or running job
    pub fn cancel(&self, file: &Path) -> CancelOutcome {
        let outcome = {
            let mut state = self.lock();
            let Cancellation { outcome, discarded } = state.cancel(file);
            self.emit_cancelled(discarded);
            outcome
        };
        match outcome {
            CancelOutcome::Dequeued(id) => info!(job_id = %id, file = %file.display(), "Removed queued job"),
            CancelOutcome::Signalled(id) => info!(job_id = %id, file = %file.display(), "Cancelling running job"),
            CancelOutcome::NothingToCancel => debug!(file = %file.display(), "Nothing to cancel"),
        }
        self.inner.wake.notify_one();
        outcome
    }

    /// Run one scheduling pass, dispatching every admitted job. Returns how
    /// many jobs started.
    pub fn tick(&self) -> usize {
        let admitted = self.lock().admit();
        let started = admitted.len();
        for job in admitted {
            self.dispatch(job);
        }
        started
    }

    fn dispatch(&self, Admitted { job, cancel }: Admitted) {
        info!(job_id = %job.id, class = %job.class, file = %job.file.display(), "Job started");
        self.emit(JobEvent::Started(job.info()));

        let scheduler = self.clone();
        let executor = self.executor(job.class);
        tokio::spawn(async move {
            let task_job = job.clone();
            let task_cancel = cancel.clone();
            // Inner task so a panicking executor still releases its slot
            let result = match tokio::spawn(async move {
                executor.execute(&task_job, task_cancel).await
            })
            .await
            {
                Ok(result) => result,
                Err(e) => Err(e.into()),
            };
            scheduler.finish(job, &cancel, result);
        });
    }

    fn finish(&self, job: Job, cancel: &CancellationToken, result: Result<JobOutput>) {
        let outcome = match result {
            Ok(output) => JobOutcome::Completed(output),
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => JobOutcome::Cancelled,
            Err(e) => {
                error!(job_id = %job.id, class = %job.class, file = %job.file.display(), error = %e, "Job failed");
                JobOutcome::Failed(JobFailure::from(&e))
            }
        };
        let terminal = match &outcome {
            JobOutcome::Completed(_) => Terminal::Completed,
            JobOutcome::Failed(_) => Terminal::Failed,
            JobOutcome::Cancelled => Terminal::Cancelled,
        };

        {
            let mut state = self.lock();
            let requeued = state.complete(&job, terminal);
            self.emit(JobEvent::Finished {
                job: job.info(),
                outcome,
            });
            if let Some(next) = requeued {
                debug!(job_id = %next.id, file = %next.file.display(), "Successor queued");
                self.emit(JobEvent::Queued(next));
            }
        }
        info!(job_id = %job.id, class = %job.class, outcome = ?terminal, "Job finished");

        self.inner.wake.notify_one();
        self.tick();
    }

    /// Safety-net loop: ticks on every wake-up and at least every
    /// `safety_tick`, until `shutdown` turns true or its sender goes away.
    /// Cancels all work on exit.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.inner.safety_tick.as_millis() as u64, "Scheduler loop started");
        loop {
            tokio::select! {
                _ = self.inner.wake.notified() => {}
                _ = tokio::time::sleep(self.inner.safety_tick) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Scheduler loop shutting down");
                        break;
                    }
                }
            }
            let started = self.tick();
            if started > 0 {
                debug!(started, "Scheduling pass started jobs");
            }
        }
        self.shutdown();
    }

    /// Stop accepting jobs and cancel everything queued or running
    pub fn shutdown(&self) {
        let mut state = self.lock();
        let cancellations = state.close();
        if !cancellations.is_empty() {
            warn!(count = cancellations.len(), "Cancelling outstanding jobs");
        }
        for Cancellation { discarded, .. } in cancellations {
            self.emit_cancelled(discarded);
        }
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        self.lock().snapshot()
    }

    pub fn file_status(&self, file: &Path) -> FileStatus {
        self.lock().tracker().status(&normalize_path(file))
    }

    pub fn file_snapshot(&self, file: &Path) -> FileSnapshot {
        self.lock().tracker().snapshot(&normalize_path(file))
    }

    pub fn policy(&self) -> BusyPolicy {
        self.lock().policy()
    }

    /// True while the job is queued, running, or waiting to replace a running job
    pub fn is_live(&self, job_id: JobId) -> bool {
        self.lock().tracker().is_live(job_id)
    }

    /// Wait for the given job's terminal outcome on a receiver obtained
    /// before the job was submitted.
    ///
    /// Returns `None` when the channel closes, or when the receiver lagged
    /// and the job is no longer live (its `Finished` event was dropped).
    pub async fn wait_for(
        &self,
        receiver: &mut broadcast::Receiver<JobEvent>,
        job_id: JobId,
    ) -> Option<JobOutcome> {
        loop {
            match receiver.recv().await {
                Ok(JobEvent::Finished { job, outcome }) if job.id == job_id => return Some(outcome),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    if self.is_live(job_id) {
                        debug!(job_id = %job_id, skipped, "Event receiver lagged, job still live");
                        continue;
                    }
                    // Finished may still sit in the retained tail
                    let outcome = drain_for(receiver, job_id);
                    if outcome.is_none() {
                        warn!(job_id = %job_id, skipped, "Event receiver lagged past job completion");
                    }
                    return outcome;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Scan already-buffered events for the job's outcome without waiting
fn drain_for(receiver: &mut broadcast::Receiver<JobEvent>, job_id: JobId) -> Option<JobOutcome> {
    loop {
        match receiver.try_recv() {
            Ok(JobEvent::Finished { job, outcome }) if job.id == job_id => return Some(outcome),
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => return None,
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;

    /// Completes immediately, or fails for files ending in `.bad`
    struct Immediate;

    #[async_trait]
    impl JobExecutor for Immediate {
        async fn execute(&self, job: &Job, _cancel: CancellationToken) -> Result<JobOutput> {
            if job.file.extension().is_some_and(|e| e == "bad") {
                return Err(OrchestratorError::Parse("bad input".to_string()));
            }
            Ok(JobOutput::Json(serde_json::json!({ "file": job.file })))
        }
    }

    /// Runs until cancelled
    struct Forever;

    #[async_trait]
    impl JobExecutor for Forever {
        async fn execute(&self, _job: &Job, cancel: CancellationToken) -> Result<JobOutput> {
            cancel.cancelled().await;
            Err(OrchestratorError::Cancelled)
        }
    }

    fn scheduler(analyze: Arc<dyn JobExecutor>, fix: Arc<dyn JobExecutor>) -> Scheduler {
        Scheduler::new(SchedulerOptions::default(), analyze, fix)
    }

    #[tokio::test]
    async fn test_completion_event() {
        let scheduler = scheduler(Arc::new(Immediate), Arc::new(Immediate));
        let mut rx = scheduler.subscribe();
        let receipt = scheduler
            .submit(JobRequest::analyze("/w/app", serde_json::Value::Null))
            .unwrap();

        let outcome = scheduler.wait_for(&mut rx, receipt.job_id).await.unwrap();
        assert!(outcome.is_completed());
        assert_eq!(scheduler.file_status(Path::new("/w/app")), FileStatus::Idle);
        assert_eq!(scheduler.snapshot().active_analyze, 0);
    }

    #[tokio::test]
    async fn test_failure_carries_kind() {
        let scheduler = scheduler(Arc::new(Immediate), Arc::new(Immediate));
        let mut rx = scheduler.subscribe();
        let receipt = scheduler
            .submit(JobRequest::fix("/w/A.bad", serde_json::Value::Null))
            .unwrap();

        let outcome = scheduler.wait_for(&mut rx, receipt.job_id).await.unwrap();
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, crate::error::ErrorKind::Parse);
        assert_eq!(
            scheduler.file_snapshot(Path::new("/w/A.bad")).last,
            Some(Terminal::Failed)
        );
    }

    #[tokio::test]
    async fn test_cancel_running_is_not_failure() {
        let scheduler = scheduler(Arc::new(Forever), Arc::new(Forever));
        let mut rx = scheduler.subscribe();
        let receipt = scheduler
            .submit(JobRequest::fix("/w/A.java", serde_json::Value::Null))
            .unwrap();
        assert_eq!(scheduler.file_status(Path::new("/w/A.java")), FileStatus::InProgress);

        assert_eq!(
            scheduler.cancel(Path::new("/w/A.java")),
            CancelOutcome::Signalled(receipt.job_id)
        );
        let outcome = scheduler.wait_for(&mut rx, receipt.job_id).await.unwrap();
        assert!(outcome.is_cancelled());
        assert_eq!(scheduler.file_status(Path::new("/w/A.java")), FileStatus::Idle);
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let scheduler = scheduler(Arc::new(Forever), Arc::new(Forever));
        let (tx, rx) = watch::channel(false);
        let loop_handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run(rx).await }
        });

        let mut events = scheduler.subscribe();
        let receipt = scheduler
            .submit(JobRequest::analyze("/w/app", serde_json::Value::Null))
            .unwrap();
        tx.send(true).unwrap();
        loop_handle.await.unwrap();

        let outcome = scheduler.wait_for(&mut events, receipt.job_id).await.unwrap();
        assert!(outcome.is_cancelled());
        assert!(scheduler
            .submit(JobRequest::analyze("/w/other", serde_json::Value::Null))
            .is_err());
    }

    /// Queue and dequeue `count` Fix jobs, two events each, against a zero Fix cap
    fn flood(scheduler: &Scheduler, count: usize) {
        for i in 0..count {
            let file = format!("/w/flood{}.java", i);
            scheduler
                .submit(JobRequest::fix(&file, serde_json::Value::Null))
                .unwrap();
            scheduler.cancel(Path::new(&file));
        }
    }

    fn flood_options() -> SchedulerOptions {
        SchedulerOptions {
            limits: WorkerLimits { analyze: 1, fix: 0 },
            ..SchedulerOptions::default()
        }
    }

    #[tokio::test]
    async fn test_wait_for_returns_when_outcome_lagged_away() {
        let scheduler = Scheduler::new(flood_options(), Arc::new(Immediate), Arc::new(Immediate));
        let mut rx = scheduler.subscribe();
        let receipt = scheduler
            .submit(JobRequest::analyze("/w/app", serde_json::Value::Null))
            .unwrap();
        while scheduler.is_live(receipt.job_id) {
            tokio::task::yield_now().await;
        }

        flood(&scheduler, EVENT_CAPACITY);
        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            scheduler.wait_for(&mut rx, receipt.job_id),
        )
        .await
        .expect("wait_for hung after lag");
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_wait_for_survives_lag_while_job_live() {
        let scheduler = Scheduler::new(flood_options(), Arc::new(Immediate), Arc::new(Immediate));
        let mut rx = scheduler.subscribe();
        let receipt = scheduler
            .submit(JobRequest::analyze("/w/app", serde_json::Value::Null))
            .unwrap();
        // The job has not run yet on this single-threaded runtime
        flood(&scheduler, EVENT_CAPACITY);
        assert!(scheduler.is_live(receipt.job_id));

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            scheduler.wait_for(&mut rx, receipt.job_id),
        )
        .await
        .unwrap();
        assert!(outcome.unwrap().is_completed());
    }
}
