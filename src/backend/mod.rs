// src/backend/mod.rs
// Client for the fix backend service

mod executor;

pub use executor::{FixExecutor, FixJobRequest, FixOutput};

use crate::error::{OrchestratorError, Result};
use crate::results::Issue;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Endpoint for a single incident
pub const INCIDENT_SOLUTION_PATH: &str = "/get_incident_solution";

/// Endpoint for all incidents of one file
pub const FILE_SOLUTIONS_PATH: &str = "/get_incident_solutions_for_file";

/// Longest error body kept in an error message
const MAX_ERROR_BODY: usize = 2_000;

/// One incident as the backend expects it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentPayload {
    pub violation_name: String,
    pub ruleset_name: String,
    pub incident_variables: BTreeMap<String, String>,
    pub line_number: u32,
    pub analysis_message: String,
}

impl IncidentPayload {
    pub fn from_issue(issue: &Issue) -> Self {
        Self {
            violation_name: issue.rule_id.clone(),
            ruleset_name: issue.ruleset_name.clone(),
            incident_variables: issue.variables.clone(),
            line_number: issue.line_number,
            analysis_message: issue.message.clone(),
        }
    }
}

/// Body for `/get_incident_solutions_for_file`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFixRequest {
    /// Path relative to the application root when known
    pub file_name: String,
    pub file_contents: String,
    pub application_name: String,
    pub incidents: Vec<IncidentPayload>,
    pub include_llm_results: bool,
}

/// Body for `/get_incident_solution`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentFixRequest {
    pub file_name: String,
    pub file_contents: String,
    pub application_name: String,
    #[serde(flatten)]
    pub incident: IncidentPayload,
    pub include_llm_results: bool,
}

/// What the backend proposes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixResponse {
    pub updated_file: Option<String>,
    pub total_reasoning: Option<String>,
    pub used_prompts: Option<serde_json::Value>,
    pub model_id: Option<String>,
    pub additional_information: Option<String>,
    pub llm_results: Option<serde_json::Value>,
}

/// HTTP client for the fix backend. Never retries; callers resubmit.
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: String,
    client: Client,
}

impl BackendClient {
    /// Fails with `Configuration` if `base_url` is not a URL
    pub fn new(base_url: impl Into<String>, client: Client) -> Result<Self> {
        let base_url = base_url.into();
        url::Url::parse(&base_url).map_err(|e| {
            OrchestratorError::Configuration(format!("invalid backend URL {}: {}", base_url, e))
        })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn incident_solution(
        &self,
        request: &IncidentFixRequest,
        cancel: &CancellationToken,
    ) -> Result<FixResponse> {
        self.post(INCIDENT_SOLUTION_PATH, request, cancel).await
    }

    pub async fn incident_solutions_for_file(
        &self,
        request: &FileFixRequest,
        cancel: &CancellationToken,
    ) -> Result<FixResponse> {
        self.post(FILE_SOLUTIONS_PATH, request, cancel).await
    }

    /// POST `body` and decode a `FixResponse`. Cancelling drops the request
    /// future, which aborts the connection.
    async fn post<T: Serialize + Sync>(
        &self,
        path: &str,
        body: &T,
        cancel: &CancellationToken,
    ) -> Result<FixResponse> {
        let url = self.endpoint(path);
        debug!(url = %url, "Calling fix backend");

        let request = async {
            let response = self
                .client
                .post(&url)
                .json(body)
                .send()
                .await
                .map_err(|e| OrchestratorError::Network(format!("{}: {}", url, e)))?;

            let status = response.status();
            if !status.is_success() {
                let mut error_body = response.text().await.unwrap_or_default();
                if error_body.len() > MAX_ERROR_BODY {
                    let mut cut = MAX_ERROR_BODY;
                    while !error_body.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    error_body.truncate(cut);
                }
                warn!(url = %url, status = %status, "Fix backend returned an error");
                return Err(OrchestratorError::Backend {
                    status: status.as_u16(),
                    body: error_body,
                });
            }

            let text = response
                .text()
                .await
                .map_err(|e| OrchestratorError::Network(format!("{}: {}", url, e)))?;
            serde_json::from_str::<FixResponse>(&text)
                .map_err(|e| OrchestratorError::Schema(format!("fix response: {}", e)))
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(url = %url, "Fix request cancelled");
                Err(OrchestratorError::Cancelled)
            }
            result = request => result,
        }
    }
}
