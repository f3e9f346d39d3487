//! Tenant reference attribute resolution.
//!
//! Most entity types hold their tenant reference in one attribute
//! (`company_id`). A few expose a different attribute, and some use a
//! different one for read rules than for edit rules: the tenant entity
//! filters on its own `id`, and the actor entity reads through the set of
//! tenants it belongs to but edits through its current tenant.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ConfigError;
use crate::AccessMode;

/// Per-entity-type tenant attribute names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantFieldOverride {
    /// Attribute used by read rules.
    pub read: String,
    /// Attribute used by edit and read-and-edit rules.
    pub edit: String,
}

impl TenantFieldOverride {
    pub fn new(read: impl Into<String>, edit: impl Into<String>) -> Self {
        Self {
            read: read.into(),
            edit: edit.into(),
        }
    }
}

/// Configuration of the tenant reference carried by entity types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyConfig {
    /// Attribute holding the tenant reference when not overridden.
    #[serde(default = "default_field")]
    pub default_field: String,

    /// Per-entity-type overrides, keyed by dotted entity name.
    #[serde(default = "default_overrides")]
    pub overrides: BTreeMap<String, TenantFieldOverride>,

    /// Tenant that owns shared system data.
    #[serde(default = "default_system_tenant")]
    pub system_tenant: i64,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            default_field: default_field(),
            overrides: default_overrides(),
            system_tenant: default_system_tenant(),
        }
    }
}

impl TenancyConfig {
    /// Get the tenant attribute a rule of `mode` on `entity` filters on.
    pub fn tenant_field(&self, entity: &str, mode: AccessMode) -> &str {
        match self.overrides.get(entity) {
            Some(o) if mode == AccessMode::Read => &o.read,
            Some(o) => &o.edit,
            None => &self.default_field,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.default_field.trim().is_empty() {
            return Err(ConfigError::Config(
                "tenancy.default_field must not be empty".to_string(),
            ));
        }
        for (entity, o) in &self.overrides {
            if o.read.trim().is_empty() || o.edit.trim().is_empty() {
                return Err(ConfigError::Config(format!(
                    "tenancy.overrides.{} must name both read and edit attributes",
                    entity
                )));
            }
        }
        if self.system_tenant <= 0 {
            return Err(ConfigError::Config(format!(
                "tenancy.system_tenant must be positive, got {}",
                self.system_tenant
            )));
        }
        Ok(())
    }
}

fn default_field() -> String {
    "company_id".to_string()
}

fn default_overrides() -> BTreeMap<String, TenantFieldOverride> {
    BTreeMap::from([
        ("res.company".to_string(), TenantFieldOverride::new("id", "id")),
        (
            "res.users".to_string(),
            TenantFieldOverride::new("company_ids", "company_id"),
        ),
    ])
}

fn default_system_tenant() -> i64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tenant_field() {
        let config = TenancyConfig::default();
        assert_eq!(config.tenant_field("sale.order", AccessMode::Read), "company_id");
        assert_eq!(
            config.tenant_field("sale.order", AccessMode::ReadAndEdit),
            "company_id"
        );
    }

    #[test]
    fn test_asymmetric_override() {
        let config = TenancyConfig::default();
        assert_eq!(config.tenant_field("res.users", AccessMode::Read), "company_ids");
        assert_eq!(config.tenant_field("res.users", AccessMode::Edit), "company_id");
        assert_eq!(config.tenant_field("res.company", AccessMode::Read), "id");
        assert_eq!(config.tenant_field("res.company", AccessMode::Edit), "id");
    }

    #[test]
    fn test_explicit_overrides_replace_defaults() {
        let yaml = "overrides:\n  hr.employee:\n    read: company_ids\n    edit: company_id\n";
        let config: TenancyConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.tenant_field("res.users", AccessMode::Read), "company_id");
        assert_eq!(
            config.tenant_field("hr.employee", AccessMode::Read),
            "company_ids"
        );
    }
}
