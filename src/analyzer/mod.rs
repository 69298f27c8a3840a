//! Analyzer integration: command-line construction, provider settings, and
//! the executor that runs Analyze jobs end to end.

pub mod params;
pub mod provider;

pub use params::{build_analyzer_args, label_selector};
pub use provider::{provider_configs, write_provider_settings, ProviderConfig, ProviderName};

use crate::config::AnalysisConfig;
use crate::error::{OrchestratorError, Result};
use crate::process::{ProcessRunner, RunSpec};
use crate::results::{
    ingest, wait_for_output, AnalysisSummary, ResultsStore, LOG_FILE, OUTPUT_FILE,
    OUTPUT_POLL_ATTEMPTS,
};
use crate::scheduler::{Job, JobExecutor, JobOutput};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Payload of an Analyze job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub config: AnalysisConfig,
    /// Write results somewhere other than the configured output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_override: Option<PathBuf>,
}

/// Runs the analyzer process and ingests what it writes
pub struct AnalyzeExecutor {
    results: ResultsStore,
    startup_timeout: Duration,
    poll_delay: Duration,
    /// Used when the configuration does not name an executable
    analyzer_cli: Option<String>,
}

impl AnalyzeExecutor {
    pub fn new(results: ResultsStore, startup_timeout: Duration) -> Self {
        Self {
            results,
            startup_timeout,
            poll_delay: Duration::from_millis(crate::config::env::DEFAULT_RESULTS_POLL_MS),
            analyzer_cli: None,
        }
    }

    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    pub fn with_analyzer_cli(mut self, cli: Option<String>) -> Self {
        self.analyzer_cli = cli;
        self
    }
}

#[async_trait]
impl JobExecutor for AnalyzeExecutor {
    async fn execute(&self, job: &Job, cancel: CancellationToken) -> Result<JobOutput> {
        let request: AnalyzeRequest = serde_json::from_value(job.payload.clone())
            .map_err(|e| OrchestratorError::Schema(format!("analyze job payload: {}", e)))?;
        let config = &request.config;

        let executable = config.executable(self.analyzer_cli.as_deref())?;
        let output_dir = config.output_dir(request.output_override.as_deref())?;
        let lib_path = config.lib_path.as_deref();
        let args = build_analyzer_args(config, lib_path, &output_dir)?;

        let providers = provider_configs(&config.providers, lib_path, &config.input);
        write_provider_settings(&output_dir, &providers).await?;

        let spec = RunSpec::new(executable.clone())
            .args(args)
            .with_cwd(&output_dir)
            .with_startup_timeout(self.startup_timeout)
            .with_log_file(output_dir.join(LOG_FILE))
            .with_cancel(cancel.clone());

        let executed_at = Utc::now();
        let started = Instant::now();
        let lines = Arc::new(AtomicUsize::new(0));
        let counter = lines.clone();
        let job_id = job.id;

        info!(job_id = %job_id, config = %config.name, output = %output_dir.display(), "Running analysis");
        let mut handle = ProcessRunner::run(
            spec,
            move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            },
            move |exit| debug!(job_id = %job_id, code = ?exit.code, "Analyzer shut down"),
        )
        .await?;

        let exit = handle.wait().await;
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        if !exit.success() {
            warn!(
                job_id = %job_id,
                code = ?exit.code,
                lines = lines.load(Ordering::Relaxed),
                "Analysis failed"
            );
            return Err(OrchestratorError::ProcessExit { code: exit.code });
        }

        let output_file = output_dir.join(OUTPUT_FILE);
        let output_path = tokio::select! {
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            found = wait_for_output(&output_file, OUTPUT_POLL_ATTEMPTS, self.poll_delay) => found?,
        };
        let raw = tokio::fs::read_to_string(&output_path).await?;
        let report = ingest(&raw)?;

        let mut summary = AnalysisSummary::from_report(config.name.clone(), &output_dir, &report);
        summary.executable = Some(executable);
        summary.executed_at = executed_at;
        summary.duration_ms = Some(started.elapsed().as_millis() as u64);

        self.results.replace(&config.name, report);
        info!(
            job_id = %job_id,
            hints = summary.hint_count,
            files = summary.file_count,
            skipped = summary.skipped_incidents,
            "Analysis complete"
        );
        Ok(JobOutput::Analysis(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trip_through_payload() {
        let request = AnalyzeRequest {
            config: AnalysisConfig {
                name: "coolstore".to_string(),
                input: vec![PathBuf::from("/w/app")],
                ..Default::default()
            },
            output_override: None,
        };
        let payload = serde_json::to_value(&request).unwrap();
        assert!(payload.get("output_override").is_none());
        let decoded: AnalyzeRequest = serde_json::from_value(payload).unwrap();
        assert_eq!(decoded, request);
    }

    #[tokio::test]
    async fn test_missing_executable_is_configuration_error() {
        let executor = AnalyzeExecutor::new(ResultsStore::new(), Duration::from_secs(1));
        let job = Job {
            id: crate::scheduler::JobId(1),
            class: crate::scheduler::JobClass::Analyze,
            file: PathBuf::from("/w/app"),
            payload: serde_json::to_value(AnalyzeRequest {
                config: AnalysisConfig::default(),
                output_override: None,
            })
            .unwrap(),
            name: None,
        };
        let err = executor.execute(&job, CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("cannot find analyzer executable path"));
    }

    #[tokio::test]
    async fn test_bad_payload_is_schema_error() {
        let executor = AnalyzeExecutor::new(ResultsStore::new(), Duration::from_secs(1));
        let job = Job {
            id: crate::scheduler::JobId(1),
            class: crate::scheduler::JobClass::Analyze,
            file: PathBuf::from("/w/app"),
            payload: serde_json::json!({ "config": 42 }),
            name: None,
        };
        let err = executor.execute(&job, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Schema(_)));
    }
}
