// src/http.rs
// HTTP client for the fix backend

use crate::error::{OrchestratorError, Result};
use std::time::Duration;

/// Upper bound on establishing a connection to the backend
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Build the pooled client every fix job shares.
///
/// `request_timeout` bounds a whole backend call, so it has to cover a slow
/// model generating a full file.
pub fn create_shared_client(request_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(request_timeout)
        .connect_timeout(CONNECT_TIMEOUT.min(request_timeout))
        .pool_max_idle_per_host(4)
        .build()
        .map_err(|e| OrchestratorError::Configuration(format!("cannot build HTTP client: {e}")))
}
