//! Analysis results: ingestion of the analyzer's output document into a
//! file-indexed issue model, and the per-configuration store holding the
//! latest ingestion.

mod ingest;
mod model;
mod store;

pub use ingest::ingest;
pub use model::{AnalysisSummary, IngestReport, Issue, IssueIndex, SkippedIncident};
pub use store::ResultsStore;

use crate::error::{OrchestratorError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Primary findings file inside an output directory
pub const OUTPUT_FILE: &str = "output.yaml";

/// Dependency findings file inside an output directory
pub const DEP_OUTPUT_FILE: &str = "dep-output.yaml";

/// Raw analyzer transcript inside an output directory
pub const LOG_FILE: &str = "analysis.log";

/// How many times to look for output.yaml after the analyzer exits
pub const OUTPUT_POLL_ATTEMPTS: u32 = 15;

/// Ingest `output.yaml` from an existing output directory
pub async fn load_results(dir: &Path) -> Result<IngestReport> {
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return Err(OrchestratorError::Configuration(format!(
            "output location does not exist: {}",
            dir.display()
        )));
    }
    let path = dir.join(OUTPUT_FILE);
    let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
        OrchestratorError::Configuration(format!("cannot read {}: {}", path.display(), e))
    })?;
    info!(path = %path.display(), bytes = raw.len(), "Loading analysis results");
    ingest(&raw)
}

/// Wait for `path` to appear, checking up to `attempts` times
pub async fn wait_for_output(path: &Path, attempts: u32, delay: Duration) -> Result<PathBuf> {
    for attempt in 1..=attempts {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(path.to_path_buf());
        }
        debug!(path = %path.display(), attempt, "Waiting for analyzer output");
        tokio::time::sleep(delay).await;
    }
    Err(OrchestratorError::Configuration(format!(
        "analyzer output {} did not appear",
        path.display()
    )))
}
