// src/config/file.rs
// File-based analysis configuration from ~/.orchestrator/config.toml

use crate::analyzer::provider::ProviderName;
use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One analysis configuration: what to analyze, where to write, which rules apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AnalysisConfig {
    /// Configuration name, used as the key for ingested results
    pub name: String,
    /// Analyzer executable
    pub cli: Option<String>,
    /// Application inputs (directories or archives)
    pub input: Vec<PathBuf>,
    /// Output directory (cwd of the analyzer, holds output.yaml)
    pub output: Option<PathBuf>,
    /// Analysis mode, e.g. `source-only` or `full`
    pub mode: Option<String>,
    /// Extra rule paths
    pub rules: Vec<PathBuf>,
    /// Source technology labels
    pub source: Vec<String>,
    /// Target technology labels
    pub target: Vec<String>,
    pub enable_default_rulesets: bool,
    pub analyze_known_libraries: bool,
    /// Directory holding bundled rulesets and provider binaries
    pub lib_path: Option<PathBuf>,
    /// External providers to configure alongside `builtin`
    pub providers: Vec<ProviderEntry>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            cli: None,
            input: Vec::new(),
            output: None,
            mode: None,
            rules: Vec::new(),
            source: Vec::new(),
            target: Vec::new(),
            enable_default_rulesets: true,
            analyze_known_libraries: false,
            lib_path: None,
            providers: Vec::new(),
        }
    }
}

/// External provider declared in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProviderEntry {
    pub name: ProviderName,
    /// Address of an already running provider (`host:port`)
    #[serde(default)]
    pub address: Option<String>,
}

impl AnalysisConfig {
    /// Load the configuration.
    ///
    /// An explicit path must exist and parse. The default path is optional:
    /// a missing file yields defaults and a malformed one is logged and ignored.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                OrchestratorError::Configuration(format!(
                    "cannot read config {}: {}",
                    path.display(),
                    e
                ))
            })?;
            return Self::parse(&contents).map_err(|e| {
                OrchestratorError::Configuration(format!("{}: {}", path.display(), e))
            });
        }

        let path = Self::default_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded config from file");
                    Ok(config)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse config file");
                    Ok(Self::default())
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse TOML contents
    pub fn parse(contents: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".orchestrator")
            .join("config.toml")
    }

    /// Output directory, preferring an explicit override
    pub fn output_dir(&self, override_dir: Option<&Path>) -> Result<PathBuf> {
        match override_dir.or(self.output.as_deref()) {
            Some(dir) if !dir.as_os_str().is_empty() => Ok(dir.to_path_buf()),
            _ => Err(OrchestratorError::Configuration(
                "output is missing from configuration".to_string(),
            )),
        }
    }

    /// Analyzer executable: the configured `cli` wins over the environment override
    pub fn executable(&self, env_override: Option<&str>) -> Result<String> {
        self.cli
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .or(env_override)
            .map(str::to_string)
            .ok_or_else(|| {
                OrchestratorError::Configuration(
                    "cannot find analyzer executable path".to_string(),
                )
            })
    }

    /// Application root used to relativize file names sent to the backend
    pub fn application_root(&self) -> Option<&Path> {
        self.input.first().map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
name = "coolstore"
cli = "/usr/local/bin/kantra"
input = ["/work/coolstore"]
output = "/work/out"
mode = "source-only"
target = ["quarkus", "jakarta-ee"]
enable-default-rulesets = false

[[providers]]
name = "java"
address = "localhost:14651"
"#;
        let config = AnalysisConfig::parse(toml).unwrap();
        assert_eq!(config.name, "coolstore");
        assert_eq!(config.input, vec![PathBuf::from("/work/coolstore")]);
        assert_eq!(config.mode.as_deref(), Some("source-only"));
        assert_eq!(config.target.len(), 2);
        assert!(!config.enable_default_rulesets);
        assert_eq!(config.providers[0].name, ProviderName::Java);
        assert_eq!(config.providers[0].address.as_deref(), Some("localhost:14651"));
    }

    #[test]
    fn test_parse_empty_config() {
        let config = AnalysisConfig::parse("").unwrap();
        assert_eq!(config, AnalysisConfig::default());
        assert!(config.enable_default_rulesets);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let err = AnalysisConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, OrchestratorError::Configuration(_)));
    }

    #[test]
    fn test_explicit_malformed_file_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "input = [unterminated").unwrap();
        let err = AnalysisConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_output_dir_override_wins() {
        let config = AnalysisConfig {
            output: Some(PathBuf::from("/configured")),
            ..Default::default()
        };
        assert_eq!(
            config.output_dir(Some(Path::new("/override"))).unwrap(),
            PathBuf::from("/override")
        );
        assert_eq!(config.output_dir(None).unwrap(), PathBuf::from("/configured"));
        assert!(AnalysisConfig::default().output_dir(None).is_err());
    }

    #[test]
    fn test_executable_resolution() {
        let mut config = AnalysisConfig::default();
        assert!(config.executable(None).is_err());
        assert_eq!(config.executable(Some("/env/kantra")).unwrap(), "/env/kantra");

        config.cli = Some("  /cfg/kantra ".to_string());
        assert_eq!(config.executable(Some("/env/kantra")).unwrap(), "/cfg/kantra");
    }
}
