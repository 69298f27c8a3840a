// src/results/ingest.rs
// Turns the analyzer's output document into an IssueIndex

use super::model::{IngestReport, Issue, SkippedIncident};
use crate::error::{OrchestratorError, Result};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIncident {
    uri: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code_snip: Option<String>,
    #[serde(default)]
    line_number: Option<u32>,
    #[serde(default)]
    variables: Option<Mapping>,
}

/// Parse an analyzer output document (YAML or JSON) into issues.
///
/// Accepts a sequence of rulesets, a single-element wrapper carrying a
/// `rulesets` key, or a map with `rulesets`. A document that does not parse
/// fails with `Parse`; one that parses but has none of those shapes fails
/// with `Schema`. Individual malformed incidents are skipped and recorded.
pub fn ingest(raw: &str) -> Result<IngestReport> {
    let doc: Value = serde_yaml::from_str(raw)
        .map_err(|e| OrchestratorError::Parse(format!("results document: {}", e)))?;

    let rulesets = locate_rulesets(&doc)?;
    let mut report = IngestReport::default();

    for (ruleset_pos, ruleset) in rulesets.iter().enumerate() {
        let Some(ruleset) = ruleset.as_mapping() else {
            warn!(position = ruleset_pos, "Ruleset entry is not a mapping, skipping");
            continue;
        };
        let ruleset_name = string_field(ruleset, "name").unwrap_or_default();

        let Some(violations) = ruleset.get("violations") else {
            continue;
        };
        let Some(violations) = violations.as_mapping() else {
            warn!(ruleset = %ruleset_name, "Violations are not a mapping, skipping ruleset");
            continue;
        };

        for (rule_id, violation) in violations {
            let rule_id = scalar_to_string(rule_id);
            let category = violation
                .as_mapping()
                .and_then(|v| string_field(v, "category"));
            let Some(incidents) = violation.get("incidents").and_then(Value::as_sequence) else {
                debug!(ruleset = %ruleset_name, rule = %rule_id, "Violation without incidents");
                continue;
            };

            for (position, incident) in incidents.iter().enumerate() {
                match build_issue(incident, &ruleset_name, &rule_id, category.as_deref()) {
                    Ok(issue) => {
                        report.index.push(issue.clone());
                        report.issues.push(issue);
                    }
                    Err(reason) => {
                        warn!(
                            ruleset = %ruleset_name,
                            rule = %rule_id,
                            position,
                            reason = %reason,
                            "Skipping malformed incident"
                        );
                        report.skipped.push(SkippedIncident {
                            ruleset_name: ruleset_name.clone(),
                            rule_id: rule_id.clone(),
                            position,
                            reason,
                        });
                    }
                }
            }
        }
    }

    debug!(
        issues = report.hint_count(),
        files = report.index.len(),
        skipped = report.skipped_count(),
        "Ingested analysis results"
    );
    Ok(report)
}

fn locate_rulesets(doc: &Value) -> Result<&[Value]> {
    match doc {
        Value::Sequence(items) => {
            // Wrapped form: [{ rulesets: [...] }]
            if let Some(Value::Mapping(first)) = items.first()
                && let Some(inner) = first.get("rulesets")
            {
                return inner.as_sequence().map(Vec::as_slice).ok_or_else(|| {
                    OrchestratorError::Schema("`rulesets` is not a list".to_string())
                });
            }
            Ok(items.as_slice())
        }
        Value::Mapping(map) => map
            .get("rulesets")
            .and_then(Value::as_sequence)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                OrchestratorError::Schema("expected a `rulesets` list at the top level".to_string())
            }),
        // An empty output file means no findings
        Value::Null => Ok(&[]),
        other => Err(OrchestratorError::Schema(format!(
            "unexpected top-level {} in results document",
            value_kind(other)
        ))),
    }
}

fn build_issue(
    incident: &Value,
    ruleset_name: &str,
    rule_id: &str,
    category: Option<&str>,
) -> std::result::Result<Issue, String> {
    let raw: RawIncident =
        serde_yaml::from_value(incident.clone()).map_err(|e| e.to_string())?;
    let file = resolve_uri(&raw.uri)?;

    let variables: BTreeMap<String, String> = raw
        .variables
        .unwrap_or_default()
        .iter()
        .map(|(k, v)| (scalar_to_string(k), scalar_to_string(v)))
        .collect();

    Ok(Issue {
        id: Uuid::new_v4().to_string(),
        file,
        rule_id: rule_id.to_string(),
        ruleset_name: ruleset_name.to_string(),
        line_number: raw.line_number.unwrap_or(1),
        source_snippet: raw.code_snip.unwrap_or_default(),
        variables,
        message: raw.message.unwrap_or_default(),
        category: category.map(str::to_string),
        complete: false,
    })
}

/// Resolve an incident URI to an absolute path
fn resolve_uri(uri: &str) -> std::result::Result<PathBuf, String> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err("empty uri".to_string());
    }

    if let Ok(url) = url::Url::parse(uri) {
        if url.scheme() == "file" {
            return url
                .to_file_path()
                .map_err(|_| format!("cannot convert {} to a path", uri));
        }
        // Windows drive letters parse as a one-letter scheme
        if url.scheme().len() > 1 {
            return Err(format!("unsupported uri scheme `{}`", url.scheme()));
        }
    }

    let path = Path::new(uri);
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Err(format!("uri {} is not absolute", uri))
    }
}

fn string_field(map: &Mapping, key: &str) -> Option<String> {
    map.get(key).map(scalar_to_string)
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}
