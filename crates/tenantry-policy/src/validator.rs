//! Catalog self-check.
//!
//! The catalog is static, so a broken predicate is an authoring bug. This
//! check renders every template with every tenant attribute it can meet and
//! reports what fails, so authoring mistakes surface before a bootstrap run.

use serde::Serialize;
use std::fmt;
use tenantry_core::{AccessMode, SecurityClass, TenancyConfig};

use crate::catalog::Classifier;
use crate::rules::{compile_entity_rules, rule_templates};

/// Severity level of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// May indicate a configuration mistake.
    Warning,
    /// The catalog cannot produce rules.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A single catalog finding.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogFinding {
    pub severity: Severity,
    pub class: SecurityClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    pub message: String,
}

impl fmt::Display for CatalogFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entity {
            Some(entity) => write!(
                f,
                "[{}] {} ({}): {}",
                self.severity, self.class, entity, self.message
            ),
            None => write!(f, "[{}] {}: {}", self.severity, self.class, self.message),
        }
    }
}

/// Check every class's templates against the default tenant attribute and
/// every override.
pub fn check_catalog(classifier: &Classifier, tenancy: &TenancyConfig) -> Vec<CatalogFinding> {
    let mut findings = Vec::new();

    // A placeholder entity exercises the default attribute for every class.
    for class in SecurityClass::ALL {
        if let Err(e) = compile_entity_rules("tenantry.check", class, tenancy) {
            findings.push(CatalogFinding {
                severity: Severity::Error,
                class,
                entity: None,
                message: e.to_string(),
            });
        }
    }

    for (entity, fields) in &tenancy.overrides {
        let class = classifier.classify(entity);

        if let Err(e) = compile_entity_rules(entity, class, tenancy) {
            findings.push(CatalogFinding {
                severity: Severity::Error,
                class,
                entity: Some(entity.clone()),
                message: e.to_string(),
            });
        }

        let has_read_rule = rule_templates(class)
            .iter()
            .any(|t| t.mode == AccessMode::Read);
        if fields.read != fields.edit && !has_read_rule {
            findings.push(CatalogFinding {
                severity: Severity::Warning,
                class,
                entity: Some(entity.clone()),
                message: format!(
                    "read attribute '{}' is unused: {} rules are read-and-edit and filter on '{}'",
                    fields.read, class, fields.edit
                ),
            });
        }
    }

    tracing::debug!(findings = findings.len(), "catalog checked");
    findings
}
