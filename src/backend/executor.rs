// src/backend/executor.rs
// Fix jobs: send a file and its issues to the backend

use super::{BackendClient, FileFixRequest, FixResponse, IncidentPayload};
use crate::error::{OrchestratorError, Result};
use crate::results::Issue;
use crate::scheduler::{Job, JobExecutor, JobOutput};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Payload of a Fix job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixJobRequest {
    pub application_name: String,
    /// Used to send a relative file name
    #[serde(default)]
    pub application_root: Option<PathBuf>,
    pub issues: Vec<Issue>,
    #[serde(default = "default_include_llm_results")]
    pub include_llm_results: bool,
    /// Directory to write the proposed file into
    #[serde(default)]
    pub proposed_dir: Option<PathBuf>,
}

fn default_include_llm_results() -> bool {
    true
}

/// Result of a Fix job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixOutput {
    pub file: PathBuf,
    pub response: FixResponse,
    /// Where the proposed file was written, if anywhere
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_file: Option<PathBuf>,
    pub duration_ms: u64,
}

/// Executes Fix jobs against the backend
pub struct FixExecutor {
    client: BackendClient,
}

impl FixExecutor {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

/// Write `contents` to `<dir>/fix-<file name>`. Failure is logged, not fatal.
async fn write_proposed(dir: &Path, file: &Path, contents: &str) -> Option<PathBuf> {
    let name = file.file_name()?.to_string_lossy();
    let path = dir.join(format!("fix-{}", name));

    let written = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, contents).await
    }
    .await;
    match written {
        Ok(()) => Some(path),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to write proposed file");
            None
        }
    }
}

/// File name as the backend should see it
pub(crate) fn relative_name(file: &Path, root: Option<&Path>) -> String {
    root.and_then(|root| file.strip_prefix(root).ok())
        .filter(|rel| !rel.as_os_str().is_empty())
        .unwrap_or(file)
        .display()
        .to_string()
}

#[async_trait]
impl JobExecutor for FixExecutor {
    async fn execute(&self, job: &Job, cancel: CancellationToken) -> Result<JobOutput> {
        let request: FixJobRequest = serde_json::from_value(job.payload.clone())
            .map_err(|e| OrchestratorError::Schema(format!("fix job payload: {}", e)))?;
        let started = Instant::now();

        let file_contents = tokio::fs::read_to_string(&job.file).await?;
        let proposed_dir = request.proposed_dir.clone();
        let body = FileFixRequest {
            file_name: relative_name(&job.file, request.application_root.as_deref()),
            file_contents,
            application_name: request.application_name,
            incidents: request.issues.iter().map(IncidentPayload::from_issue).collect(),
            include_llm_results: request.include_llm_results,
        };

        info!(
            job_id = %job.id,
            file = %body.file_name,
            incidents = body.incidents.len(),
            "Requesting fix"
        );
        let response = self.client.incident_solutions_for_file(&body, &cancel).await?;

        let proposed_file = match (response.updated_file.as_deref(), proposed_dir) {
            (Some(updated), Some(dir)) if !cancel.is_cancelled() => {
                write_proposed(&dir, &job.file, updated).await
            }
            _ => None,
        };

        Ok(JobOutput::Fix(Box::new(FixOutput {
            file: job.file.clone(),
            response,
            proposed_file,
            duration_ms: started.elapsed().as_millis() as u64,
        })))
    }
}
