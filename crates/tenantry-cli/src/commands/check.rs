//! `tenantry check` command implementation.
//!
//! Validates the configuration file against its JSON Schema, applies the
//! semantic configuration checks, and self-checks the rule catalog with the
//! configured tenant attributes.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tenantry_core::TenantryConfig;
use tenantry_policy::{check_catalog, Classifier, Severity};

const CONFIG_SCHEMA: &str = include_str!("../../../../schemas/TenantryConfig.schema.json");

#[derive(Debug, Clone, Serialize)]
pub struct CheckFinding {
    pub severity: Severity,
    pub category: &'static str,
    pub message: String,
    /// Location within the file, e.g. `/tenancy/overrides/res.users`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl CheckFinding {
    fn error(category: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            category,
            message: message.into(),
            location: None,
        }
    }

    fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

#[derive(Debug, Default, Serialize)]
pub struct CheckResults {
    pub findings: Vec<CheckFinding>,
}

impl CheckResults {
    pub fn error_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .count()
    }

    fn print_summary(&self) {
        let mut sorted: Vec<_> = self.findings.iter().collect();
        sorted.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.category.cmp(b.category)));

        for finding in sorted {
            let location = finding
                .location
                .as_deref()
                .map(|l| format!(" [{}]", l))
                .unwrap_or_default();
            println!(
                "  {} [{}]{}: {}",
                finding.severity, finding.category, location, finding.message
            );
        }

        if self.findings.is_empty() {
            println!("All checks passed.");
        } else {
            println!(
                "Summary: {} error(s), {} warning(s)",
                self.error_count(),
                self.warning_count()
            );
        }
    }
}

/// Run every check without printing.
pub fn run_quiet(config_path: &Path) -> Result<CheckResults> {
    let mut results = CheckResults::default();

    let config = if config_path.exists() {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        results.findings.extend(validate_against_schema(&content)?);

        match TenantryConfig::from_yaml(&content) {
            Ok(config) => config,
            Err(e) => {
                results.findings.push(CheckFinding::error("config", e.to_string()));
                return Ok(results);
            }
        }
    } else {
        TenantryConfig::default()
    };

    results.findings.extend(
        check_catalog(Classifier::builtin(), &config.tenancy)
            .into_iter()
            .map(|f| CheckFinding {
                severity: f.severity,
                category: "catalog",
                message: f.to_string(),
                location: f.entity.map(|e| format!("/tenancy/overrides/{}", e)),
            }),
    );

    Ok(results)
}

fn validate_against_schema(content: &str) -> Result<Vec<CheckFinding>> {
    let mut findings = Vec::new();

    let yaml: serde_yaml::Value = match serde_yaml::from_str(content) {
        Ok(v) => v,
        Err(e) => {
            findings.push(CheckFinding::error("yaml", e.to_string()));
            return Ok(findings);
        }
    };
    // An empty file is a valid, all-defaults configuration.
    if yaml.is_null() {
        return Ok(findings);
    }
    let instance = serde_json::to_value(&yaml).context("Configuration is not JSON-compatible")?;

    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Embedded schema is not valid JSON")?;
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| anyhow::anyhow!("Failed to compile JSON schema: {}", e))?;

    for error in validator.iter_errors(&instance) {
        let path = error.instance_path().to_string();
        let location = if path.is_empty() { "(root)".to_string() } else { path };
        findings.push(CheckFinding::error("json-schema", error.to_string()).with_location(location));
    }
    Ok(findings)
}

pub fn run(config_path: &Path, json: bool) -> Result<()> {
    let results = run_quiet(config_path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        println!("Checking {}", config_path.display());
        results.print_summary();
    }

    if results.error_count() > 0 {
        anyhow::bail!("check failed with {} error(s)", results.error_count());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_checks_defaults() {
        let results = run_quiet(Path::new("/nonexistent/tenantry.yaml")).unwrap();
        assert_eq!(results.error_count(), 0);
    }

    #[test]
    fn test_empty_file_is_valid() {
        let file = config_file("");
        let results = run_quiet(file.path()).unwrap();
        assert_eq!(results.error_count(), 0, "{:?}", results.findings);
    }

    #[test]
    fn test_unknown_key_is_reported_with_location() {
        let file = config_file("backfill:\n  enabled: true\n  colum: company_id\n");
        let results = run_quiet(file.path()).unwrap();

        let schema_errors: Vec<_> = results
            .findings
            .iter()
            .filter(|f| f.category == "json-schema")
            .collect();
        assert_eq!(schema_errors.len(), 1);
        assert_eq!(schema_errors[0].location.as_deref(), Some("/backfill"));
    }

    #[test]
    fn test_semantic_error_is_reported() {
        let file = config_file("manager_group: not-a-reference\n");
        let results = run_quiet(file.path()).unwrap();
        assert!(results.error_count() >= 1);
        assert!(results
            .findings
            .iter()
            .any(|f| f.category == "config" && f.message.contains("manager_group")));
    }

    #[test]
    fn test_catalog_severity_is_carried_through() {
        let file = config_file(
            "tenancy:\n  overrides:\n    hr.employee:\n      read: company_ids\n      edit: company_id\n",
        );
        let results = run_quiet(file.path()).unwrap();

        let finding = &results.findings[0];
        assert_eq!(finding.category, "catalog");
        assert_eq!(finding.severity, Severity::Warning);
        assert!(finding.message.starts_with("[WARN]"), "{}", finding.message);

        let json = serde_json::to_value(finding).unwrap();
        assert_eq!(json["severity"], "warning");
    }

    #[test]
    fn test_unused_read_override_warns() {
        let file = config_file(
            "tenancy:\n  overrides:\n    hr.employee:\n      read: company_ids\n      edit: company_id\n",
        );
        let results = run_quiet(file.path()).unwrap();

        assert_eq!(results.error_count(), 0, "{:?}", results.findings);
        assert_eq!(results.warning_count(), 1);
        assert_eq!(
            results.findings[0].location.as_deref(),
            Some("/tenancy/overrides/hr.employee")
        );
    }
}
