// src/analyzer/params.rs
// Command-line arguments for the analyzer executable

use crate::config::AnalysisConfig;
use crate::error::{OrchestratorError, Result};
use crate::results::{DEP_OUTPUT_FILE, OUTPUT_FILE};
use std::path::Path;

use super::provider::PROVIDER_SETTINGS_FILE;

/// Excludes open-source dependencies unless known libraries are analyzed
pub const DEP_LABEL_SELECTOR: &str = "--dep-label-selector=(!konveyor.io/dep-source=open-source)";

/// Build the analyzer argument list for `config` writing into `output_dir`.
///
/// Fails with `Configuration` when inputs are missing or do not exist, or
/// when no analysis mode is set.
pub fn build_analyzer_args(
    config: &AnalysisConfig,
    lib_path: Option<&Path>,
    output_dir: &Path,
) -> Result<Vec<String>> {
    if config.input.is_empty() {
        return Err(OrchestratorError::Configuration(
            "input is missing from configuration".to_string(),
        ));
    }
    for input in &config.input {
        if !input.exists() {
            return Err(OrchestratorError::Configuration(format!(
                "input path does not exist: {}",
                input.display()
            )));
        }
    }
    let mode = config
        .mode
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| {
            OrchestratorError::Configuration("mode is missing from configuration".to_string())
        })?;

    let mut args = vec![
        "--verbose".to_string(),
        "20".to_string(),
        "--output-file".to_string(),
        output_dir.join(OUTPUT_FILE).display().to_string(),
        "--dep-output-file".to_string(),
        output_dir.join(DEP_OUTPUT_FILE).display().to_string(),
        "--provider-settings".to_string(),
        output_dir.join(PROVIDER_SETTINGS_FILE).display().to_string(),
        "--analysis-mode".to_string(),
        mode.to_string(),
    ];

    if config.enable_default_rulesets {
        match lib_path {
            Some(lib) => {
                args.push("--rules".to_string());
                args.push(lib.join("rulesets").display().to_string());
            }
            None => {
                return Err(OrchestratorError::Configuration(
                    "default rulesets enabled but lib-path is not set".to_string(),
                ));
            }
        }
    }

    if !config.analyze_known_libraries {
        args.push(DEP_LABEL_SELECTOR.to_string());
    }

    if let Some(selector) = label_selector(&config.source, &config.target) {
        args.push("--label-selector".to_string());
        args.push(selector);
    }

    for rule in &config.rules {
        args.push("--rules".to_string());
        args.push(rule.display().to_string());
    }

    Ok(args)
}

/// Combine source and target labels into a selector expression
pub fn label_selector(sources: &[String], targets: &[String]) -> Option<String> {
    let sources = label_group("konveyor.io/source", sources);
    let targets = label_group("konveyor.io/target", targets);

    match (targets, sources) {
        (Some(t), Some(s)) => Some(format!("{} && {}", t, s)),
        // Targets alone still require some source label to be present
        (Some(t), None) => Some(format!("{} && konveyor.io/source", t)),
        (None, Some(s)) => Some(s),
        (None, None) => None,
    }
}

fn label_group(prefix: &str, values: &[String]) -> Option<String> {
    let labels: Vec<String> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| format!("{}={}", prefix, v))
        .collect();
    if labels.is_empty() {
        None
    } else {
        Some(format!("({})", labels.join(" || ")))
    }
}
