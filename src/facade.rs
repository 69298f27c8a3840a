// src/facade.rs
// Orchestrator: the single entry point callers use to run and cancel jobs

use crate::analyzer::{AnalyzeExecutor, AnalyzeRequest};
use crate::backend::{BackendClient, FixExecutor, FixJobRequest};
use crate::config::{AnalysisConfig, EnvConfig};
use crate::error::{OrchestratorError, Result};
use crate::http::create_shared_client;
use crate::results::{Issue, ResultsStore};
use crate::scheduler::{
    normalize_path, CancelOutcome, FileStatus, JobEvent, JobExecutor, JobId, JobOutcome,
    JobRequest, Scheduler, SchedulerOptions, SchedulerSnapshot, SubmitReceipt,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Subdirectory of the output directory holding proposed fixes
pub const FIXES_DIR: &str = "fixes";

/// Owns one scheduler, the results it feeds, and the loop that drives it
pub struct Orchestrator {
    scheduler: Scheduler,
    results: ResultsStore,
    shutdown: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Wire the analyzer and backend executors from environment configuration
    pub fn new(env: &EnvConfig) -> Result<Self> {
        let validation = env.validate();
        if !validation.is_valid() {
            return Err(OrchestratorError::Configuration(validation.report()));
        }
        for warning in &validation.warnings {
            warn!("{}", warning);
        }

        let results = ResultsStore::new();
        let analyze = AnalyzeExecutor::new(results.clone(), env.startup_timeout)
            .with_poll_delay(env.results_poll_delay)
            .with_analyzer_cli(env.analyzer_cli.clone());
        let backend = BackendClient::new(
            env.backend_url.clone(),
            create_shared_client(env.backend_timeout)?,
        )?;
        let fix = FixExecutor::new(backend);

        Ok(Self::with_executors(
            SchedulerOptions::from(env),
            results,
            Arc::new(analyze),
            Arc::new(fix),
        ))
    }

    /// Build around arbitrary executors
    pub fn with_executors(
        options: SchedulerOptions,
        results: ResultsStore,
        analyze: Arc<dyn JobExecutor>,
        fix: Arc<dyn JobExecutor>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            scheduler: Scheduler::new(options, analyze, fix),
            results,
            shutdown,
            loop_handle: Mutex::new(None),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn results(&self) -> &ResultsStore {
        &self.results
    }

    /// Spawn the safety-net scheduling loop. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut slot = self.loop_handle.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        let scheduler = self.scheduler.clone();
        let shutdown = self.shutdown.subscribe();
        *slot = Some(tokio::spawn(async move { scheduler.run(shutdown).await }));
        info!("Orchestrator started");
    }

    /// Cancel everything and wait for the loop to exit
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        self.scheduler.shutdown();
        let handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Scheduler loop ended abnormally");
        }
        info!("Orchestrator stopped");
    }

    pub fn submit(&self, request: JobRequest) -> Result<SubmitReceipt> {
        self.scheduler.submit(request)
    }

    /// Queue an analysis of `config`'s application, keyed by its root
    pub fn analyze(
        &self,
        config: AnalysisConfig,
        output_override: Option<PathBuf>,
    ) -> Result<SubmitReceipt> {
        let root = config.application_root().map(Path::to_path_buf).ok_or_else(|| {
            OrchestratorError::Configuration("input is missing from configuration".to_string())
        })?;
        let name = format!("analyze {}", config.name);
        let payload = serde_json::to_value(AnalyzeRequest {
            config,
            output_override,
        })?;
        self.submit(JobRequest::analyze(root, payload).with_name(name))
    }

    /// Queue a fix for `file` using the issues ingested for `config`
    pub fn fix(
        &self,
        file: &Path,
        config: &AnalysisConfig,
        output_override: Option<&Path>,
    ) -> Result<SubmitReceipt> {
        let file = normalize_path(file);
        let issues: Vec<Issue> = self.results.issues_for_file(&config.name, &file);
        if issues.is_empty() {
            return Err(OrchestratorError::Configuration(format!(
                "no issues recorded for {} in configuration {}",
                file.display(),
                config.name
            )));
        }

        let proposed_dir = config
            .output_dir(output_override)
            .ok()
            .map(|dir| dir.join(FIXES_DIR));
        let payload = serde_json::to_value(FixJobRequest {
            application_name: config.name.clone(),
            application_root: config.application_root().map(Path::to_path_buf),
            issues,
            include_llm_results: true,
            proposed_dir,
        })?;
        let name = format!(
            "fix {}",
            file.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        );
        self.submit(JobRequest::fix(file, payload).with_name(name))
    }

    pub fn cancel(&self, file: &Path) -> CancelOutcome {
        self.scheduler.cancel(file)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.scheduler.subscribe()
    }

    /// Wait for `job_id` to finish. `events` must have been subscribed before
    /// the job was submitted.
    pub async fn wait(
        &self,
        events: &mut broadcast::Receiver<JobEvent>,
        job_id: JobId,
    ) -> Result<JobOutcome> {
        match self.scheduler.wait_for(events, job_id).await {
            Some(outcome) => Ok(outcome),
            None if self.scheduler.is_live(job_id) => Err(OrchestratorError::Cancelled),
            None => Err(OrchestratorError::OutcomeLost { job_id: job_id.0 }),
        }
    }

    pub fn file_status(&self, file: &Path) -> FileStatus {
        self.scheduler.file_status(file)
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        self.scheduler.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::ingest;
    use crate::scheduler::{Job, JobOutput, WorkerLimits};
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct Echo;

    #[async_trait]
    impl JobExecutor for Echo {
        async fn execute(&self, job: &Job, _cancel: CancellationToken) -> Result<JobOutput> {
            Ok(JobOutput::Json(job.payload.clone()))
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::with_executors(
            SchedulerOptions::default(),
            ResultsStore::new(),
            Arc::new(Echo),
            Arc::new(Echo),
        )
    }

    #[test]
    fn test_new_rejects_invalid_env() {
        let env = EnvConfig {
            max_analyze_workers: 0,
            ..EnvConfig::default()
        };
        assert!(matches!(
            Orchestrator::new(&env),
            Err(OrchestratorError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_analyze_requires_input() {
        let orchestrator = orchestrator();
        let err = orchestrator.analyze(AnalysisConfig::default(), None).unwrap_err();
        assert!(err.to_string().contains("input is missing"));
    }

    #[tokio::test]
    async fn test_analyze_keyed_by_application_root() {
        let orchestrator = orchestrator();
        let mut events = orchestrator.subscribe();
        let config = AnalysisConfig {
            input: vec![PathBuf::from("/w/app")],
            ..Default::default()
        };
        let receipt = orchestrator.analyze(config, None).unwrap();
        let outcome = orchestrator.wait(&mut events, receipt.job_id).await.unwrap();
        assert!(outcome.is_completed());
    }

    #[tokio::test]
    async fn test_fix_uses_stored_issues() {
        let orchestrator = orchestrator();
        orchestrator.results().replace(
            "default",
            ingest("- name: rs\n  violations:\n    r1:\n      incidents:\n        - uri: file:///w/app/A.java\n").unwrap(),
        );
        let config = AnalysisConfig {
            input: vec![PathBuf::from("/w/app")],
            output: Some(PathBuf::from("/w/out")),
            ..Default::default()
        };

        assert!(orchestrator.fix(Path::new("/w/app/B.java"), &config, None).is_err());

        let mut events = orchestrator.subscribe();
        let receipt = orchestrator
            .fix(Path::new("/w/app/./A.java"), &config, None)
            .unwrap();
        let JobOutcome::Completed(JobOutput::Json(payload)) =
            orchestrator.wait(&mut events, receipt.job_id).await.unwrap()
        else {
            panic!("fix did not complete");
        };
        assert_eq!(payload["issues"].as_array().unwrap().len(), 1);
        assert_eq!(payload["application_root"], "/w/app");
        assert_eq!(payload["proposed_dir"], "/w/out/fixes");
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let orchestrator = orchestrator();
        orchestrator.start();
        orchestrator.start();
        orchestrator.stop().await;
        assert!(orchestrator
            .submit(JobRequest::fix("/w/A.java", serde_json::Value::Null))
            .is_err());
    }

    #[tokio::test]
    async fn test_wait_reports_lost_outcome_after_lag() {
        let orchestrator = Orchestrator::with_executors(
            SchedulerOptions {
                limits: WorkerLimits { analyze: 1, fix: 0 },
                ..SchedulerOptions::default()
            },
            ResultsStore::new(),
            Arc::new(Echo),
            Arc::new(Echo),
        );
        let mut events = orchestrator.subscribe();
        let receipt = orchestrator
            .submit(JobRequest::analyze("/w/app", serde_json::Value::Null))
            .unwrap();
        while orchestrator.scheduler().is_live(receipt.job_id) {
            tokio::task::yield_now().await;
        }

        // Each queued-then-cancelled fix emits two events, overrunning the buffer
        for i in 0..300 {
            let file = PathBuf::from(format!("/w/F{}.java", i));
            orchestrator
                .submit(JobRequest::fix(&file, serde_json::Value::Null))
                .unwrap();
            orchestrator.cancel(&file);
        }

        let err = orchestrator.wait(&mut events, receipt.job_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::OutcomeLost { job_id } if job_id == receipt.job_id.0));
    }
}
