// src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use crate::scheduler::{BusyPolicy, WorkerLimits};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default worker cap for each job class
pub const DEFAULT_MAX_WORKERS: usize = 2;

/// Default analyzer startup timeout
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 60_000;

/// Default deadline for one fix backend call (generation can take minutes)
pub const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 600_000;

/// Default backend base URL
pub const DEFAULT_BACKEND_URL: &str = "http://0.0.0.0:8080";

/// Default interval of the scheduler's safety-net tick
pub const DEFAULT_SAFETY_TICK_MS: u64 = 5_000;

/// Default delay between polls for the analyzer's output file
pub const DEFAULT_RESULTS_POLL_MS: u64 = 200;

/// Configuration validation result
#[derive(Debug)]
pub struct ConfigValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl Default for ConfigValidation {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigValidation {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Format as a human-readable report
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        if !self.errors.is_empty() {
            lines.push("Errors:".to_string());
            for err in &self.errors {
                lines.push(format!("  - {}", err));
            }
        }

        if !self.warnings.is_empty() {
            lines.push("Warnings:".to_string());
            for warn in &self.warnings {
                lines.push(format!("  - {}", warn));
            }
        }

        if lines.is_empty() {
            "Configuration OK".to_string()
        } else {
            lines.join("\n")
        }
    }
}

/// Environment configuration - all env vars in one place
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Concurrent analyze jobs (ORCHESTRATOR_MAX_ANALYZE_WORKERS)
    pub max_analyze_workers: usize,
    /// Concurrent fix jobs (ORCHESTRATOR_MAX_FIX_WORKERS)
    pub max_fix_workers: usize,
    /// Analyzer startup deadline (ORCHESTRATOR_STARTUP_TIMEOUT_MS)
    pub startup_timeout: Duration,
    /// Fix backend base URL (ORCHESTRATOR_BACKEND_URL)
    pub backend_url: String,
    /// Deadline for one backend call (ORCHESTRATOR_BACKEND_TIMEOUT_MS)
    pub backend_timeout: Duration,
    /// What to do when a file is already busy (ORCHESTRATOR_BUSY_POLICY)
    pub busy_policy: BusyPolicy,
    /// Safety-net scheduling interval (ORCHESTRATOR_SAFETY_TICK_MS)
    pub safety_tick: Duration,
    /// Delay between polls for output.yaml (ORCHESTRATOR_RESULTS_POLL_MS)
    pub results_poll_delay: Duration,
    /// Analyzer executable override (ORCHESTRATOR_ANALYZER_CLI)
    pub analyzer_cli: Option<String>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            max_analyze_workers: DEFAULT_MAX_WORKERS,
            max_fix_workers: DEFAULT_MAX_WORKERS,
            startup_timeout: Duration::from_millis(DEFAULT_STARTUP_TIMEOUT_MS),
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            backend_timeout: Duration::from_millis(DEFAULT_BACKEND_TIMEOUT_MS),
            busy_policy: BusyPolicy::default(),
            safety_tick: Duration::from_millis(DEFAULT_SAFETY_TICK_MS),
            results_poll_delay: Duration::from_millis(DEFAULT_RESULTS_POLL_MS),
            analyzer_cli: None,
        }
    }
}

impl EnvConfig {
    /// Load all environment configuration (call once at startup)
    pub fn load() -> Self {
        info!("Loading environment configuration");
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let busy_policy = match read("ORCHESTRATOR_BUSY_POLICY") {
            Some(raw) => BusyPolicy::parse(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "Unknown ORCHESTRATOR_BUSY_POLICY, using reject");
                BusyPolicy::Reject
            }),
            None => defaults.busy_policy,
        };

        let config = Self {
            max_analyze_workers: parse_number(
                "ORCHESTRATOR_MAX_ANALYZE_WORKERS",
                read("ORCHESTRATOR_MAX_ANALYZE_WORKERS"),
                defaults.max_analyze_workers,
            ),
            max_fix_workers: parse_number(
                "ORCHESTRATOR_MAX_FIX_WORKERS",
                read("ORCHESTRATOR_MAX_FIX_WORKERS"),
                defaults.max_fix_workers,
            ),
            startup_timeout: Duration::from_millis(parse_number(
                "ORCHESTRATOR_STARTUP_TIMEOUT_MS",
                read("ORCHESTRATOR_STARTUP_TIMEOUT_MS"),
                DEFAULT_STARTUP_TIMEOUT_MS,
            )),
            backend_url: read("ORCHESTRATOR_BACKEND_URL").unwrap_or(defaults.backend_url),
            backend_timeout: Duration::from_millis(parse_number(
                "ORCHESTRATOR_BACKEND_TIMEOUT_MS",
                read("ORCHESTRATOR_BACKEND_TIMEOUT_MS"),
                DEFAULT_BACKEND_TIMEOUT_MS,
            )),
            busy_policy,
            safety_tick: Duration::from_millis(parse_number(
                "ORCHESTRATOR_SAFETY_TICK_MS",
                read("ORCHESTRATOR_SAFETY_TICK_MS"),
                DEFAULT_SAFETY_TICK_MS,
            )),
            results_poll_delay: Duration::from_millis(parse_number(
                "ORCHESTRATOR_RESULTS_POLL_MS",
                read("ORCHESTRATOR_RESULTS_POLL_MS"),
                DEFAULT_RESULTS_POLL_MS,
            )),
            analyzer_cli: read("ORCHESTRATOR_ANALYZER_CLI"),
        };

        debug!(
            analyze_workers = config.max_analyze_workers,
            fix_workers = config.max_fix_workers,
            policy = %config.busy_policy,
            "Environment configuration loaded"
        );
        config
    }

    /// Worker caps for the scheduler
    pub fn worker_limits(&self) -> WorkerLimits {
        WorkerLimits {
            analyze: self.max_analyze_workers,
            fix: self.max_fix_workers,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigValidation {
        let mut validation = ConfigValidation::new();

        if self.max_analyze_workers == 0 {
            validation.add_error("ORCHESTRATOR_MAX_ANALYZE_WORKERS must be at least 1");
        }
        if self.max_fix_workers == 0 {
            validation.add_error("ORCHESTRATOR_MAX_FIX_WORKERS must be at least 1");
        }
        if self.startup_timeout.is_zero() {
            validation.add_error("ORCHESTRATOR_STARTUP_TIMEOUT_MS must be positive");
        }
        if self.backend_timeout.is_zero() {
            validation.add_error("ORCHESTRATOR_BACKEND_TIMEOUT_MS must be positive");
        }
        if url::Url::parse(&self.backend_url).is_err() {
            validation.add_warning(format!(
                "ORCHESTRATOR_BACKEND_URL '{}' is not a valid URL; fix jobs will fail",
                self.backend_url
            ));
        }
        if self.analyzer_cli.is_none() {
            validation.add_warning(
                "No ORCHESTRATOR_ANALYZER_CLI set; the configuration file must name the analyzer",
            );
        }

        validation
    }
}

fn parse_number<T>(name: &str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    match raw {
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!(var = name, value = %value, "Invalid numeric value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = EnvConfig::from_lookup(|_| None);
        assert_eq!(config.max_analyze_workers, 2);
        assert_eq!(config.max_fix_workers, 2);
        assert_eq!(config.startup_timeout, Duration::from_secs(60));
        assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
        assert_eq!(config.backend_timeout, Duration::from_secs(600));
        assert_eq!(config.busy_policy, BusyPolicy::Reject);
        assert!(config.analyzer_cli.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = EnvConfig::from_lookup(lookup_from(&[
            ("ORCHESTRATOR_MAX_ANALYZE_WORKERS", "1"),
            ("ORCHESTRATOR_MAX_FIX_WORKERS", "4"),
            ("ORCHESTRATOR_STARTUP_TIMEOUT_MS", "1500"),
            ("ORCHESTRATOR_BACKEND_TIMEOUT_MS", "90000"),
            ("ORCHESTRATOR_BUSY_POLICY", "replace"),
            ("ORCHESTRATOR_ANALYZER_CLI", "/opt/kantra"),
        ]));
        assert_eq!(config.worker_limits(), WorkerLimits { analyze: 1, fix: 4 });
        assert_eq!(config.startup_timeout, Duration::from_millis(1500));
        assert_eq!(config.backend_timeout, Duration::from_secs(90));
        assert_eq!(config.busy_policy, BusyPolicy::Replace);
        assert_eq!(config.analyzer_cli.as_deref(), Some("/opt/kantra"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = EnvConfig::from_lookup(lookup_from(&[
            ("ORCHESTRATOR_MAX_FIX_WORKERS", "lots"),
            ("ORCHESTRATOR_BUSY_POLICY", "whatever"),
            ("ORCHESTRATOR_ANALYZER_CLI", "   "),
        ]));
        assert_eq!(config.max_fix_workers, DEFAULT_MAX_WORKERS);
        assert_eq!(config.busy_policy, BusyPolicy::Reject);
        assert!(config.analyzer_cli.is_none());
    }

    #[test]
    fn test_validation_zero_workers_is_error() {
        let config = EnvConfig {
            max_fix_workers: 0,
            ..EnvConfig::default()
        };
        let validation = config.validate();
        assert!(!validation.is_valid());
        assert!(validation.report().contains("ORCHESTRATOR_MAX_FIX_WORKERS"));
    }

    #[test]
    fn test_validation_warnings_only() {
        let config = EnvConfig::default();
        let validation = config.validate();
        assert!(validation.is_valid()); // Warnings don't make it invalid
        assert!(!validation.warnings.is_empty());
    }

    #[test]
    fn test_empty_report() {
        assert_eq!(ConfigValidation::new().report(), "Configuration OK");
    }
}
