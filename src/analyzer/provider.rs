// src/analyzer/provider.rs
// Provider settings handed to the analyzer via provider_settings.json

use crate::config::ProviderEntry;
use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Provider settings file name inside the output directory
pub const PROVIDER_SETTINGS_FILE: &str = "provider_settings.json";

/// Language providers the analyzer knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    Builtin,
    Java,
    Go,
    Python,
    Dotnet,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::Java => "java",
            Self::Go => "go",
            Self::Python => "python",
            Self::Dotnet => "dotnet",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of provider_settings.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub name: ProviderName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<PathBuf>,
    pub init_config: Vec<Value>,
}

/// Provider configs for an analysis: `builtin` first, then each external provider
pub fn provider_configs(
    providers: &[ProviderEntry],
    lib_path: Option<&Path>,
    inputs: &[PathBuf],
) -> Vec<ProviderConfig> {
    let mut configs = vec![ProviderConfig {
        name: ProviderName::Builtin,
        address: None,
        binary_path: None,
        init_config: inputs
            .iter()
            .map(|input| json!({ "location": input.display().to_string() }))
            .collect(),
    }];

    for provider in providers {
        if provider.name == ProviderName::Builtin {
            continue;
        }
        let init_config = inputs
            .iter()
            .map(|input| {
                let mut entry = json!({ "location": input.display().to_string() });
                if provider.name == ProviderName::Java {
                    entry["providerSpecificConfig"] = java_specific_config(lib_path);
                }
                entry
            })
            .collect();

        configs.push(ProviderConfig {
            name: provider.name,
            address: provider.address.clone(),
            binary_path: None,
            init_config,
        });
    }

    configs
}

fn java_specific_config(lib_path: Option<&Path>) -> Value {
    let lib = lib_path.unwrap_or_else(|| Path::new("."));
    json!({
        "lspServerName": "java",
        "lspServerPath": lib.join("java").join("jdtls").join("bin").join("jdtls").display().to_string(),
        "depOpenSourceLabelsFile": lib.join("java").join("maven.index").display().to_string(),
        "bundles": lib.join("java").join("bundle.jar").display().to_string(),
    })
}

/// Write `configs` as 4-space indented JSON into `output_dir`
pub async fn write_provider_settings(output_dir: &Path, configs: &[ProviderConfig]) -> Result<PathBuf> {
    if !tokio::fs::try_exists(output_dir).await.unwrap_or(false) {
        return Err(OrchestratorError::Configuration(format!(
            "output directory does not exist: {}",
            output_dir.display()
        )));
    }

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    configs.serialize(&mut serializer)?;

    let path = output_dir.join(PROVIDER_SETTINGS_FILE);
    tokio::fs::write(&path, &buf).await?;
    debug!(path = %path.display(), providers = configs.len(), "Wrote provider settings");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_always_first() {
        let inputs = vec![PathBuf::from("/work/app"), PathBuf::from("/work/lib")];
        let configs = provider_configs(&[], None, &inputs);

        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].name, ProviderName::Builtin);
        assert_eq!(configs[0].init_config.len(), 2);
        assert_eq!(configs[0].init_config[1]["location"], "/work/lib");
    }

    #[test]
    fn test_java_provider_config() {
        let providers = vec![ProviderEntry {
            name: ProviderName::Java,
            address: Some("localhost:14651".to_string()),
        }];
        let inputs = vec![PathBuf::from("/work/app")];
        let configs = provider_configs(&providers, Some(Path::new("/opt/lib")), &inputs);

        assert_eq!(configs.len(), 2);
        let java = &configs[1];
        assert_eq!(java.name, ProviderName::Java);
        assert_eq!(java.address.as_deref(), Some("localhost:14651"));
        let specific = &java.init_config[0]["providerSpecificConfig"];
        assert_eq!(specific["lspServerPath"], "/opt/lib/java/jdtls/bin/jdtls");
        assert_eq!(specific["depOpenSourceLabelsFile"], "/opt/lib/java/maven.index");
    }

    #[tokio::test]
    async fn test_write_provider_settings() {
        let dir = TempDir::new().unwrap();
        let configs = provider_configs(&[], None, &[PathBuf::from("/w")]);
        let path = write_provider_settings(dir.path(), &configs).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\n    {\n        \"name\": \"builtin\""));
        let parsed: Vec<ProviderConfig> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed, configs);
    }

    #[tokio::test]
    async fn test_write_provider_settings_missing_dir() {
        let err = write_provider_settings(Path::new("/no/such/dir"), &[]).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Configuration(_)));
    }
}
