//! Configuration types for Tenantry.
//!
//! Everything is loaded from a single YAML file (`tenantry.yaml`). Every
//! section has defaults, so an empty file yields a working configuration
//! that reproduces the built-in rule catalog.

pub mod database;
pub mod tenancy;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

pub use database::DatabaseConfig;
pub use tenancy::{TenancyConfig, TenantFieldOverride};

static SYMBOLIC_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+\.[A-Za-z0-9_]+$").expect("valid regex"));

/// Complete Tenantry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantryConfig {
    /// Host database connection (used by the Postgres adapter and CLI).
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Tenant reference attribute resolution.
    #[serde(default)]
    pub tenancy: TenancyConfig,

    /// Symbolic reference (`module.name`) of the privileged actor group.
    #[serde(default = "default_manager_group")]
    pub manager_group: String,

    /// External identifier registration for generated records.
    #[serde(default)]
    pub external_ids: ExternalIdConfig,

    /// Tenant reference backfill.
    #[serde(default)]
    pub backfill: BackfillConfig,

    /// Logging configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for TenantryConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            tenancy: TenancyConfig::default(),
            manager_group: default_manager_group(),
            external_ids: ExternalIdConfig::default(),
            backfill: BackfillConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// External identifier registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalIdConfig {
    /// Register an external identifier for every created record.
    /// Off by default: it doubles the number of writes on a fresh database.
    #[serde(default)]
    pub enabled: bool,

    /// Module namespace of the registered identifiers.
    #[serde(default = "default_external_id_module")]
    pub module: String,
}

impl Default for ExternalIdConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            module: default_external_id_module(),
        }
    }
}

/// Bulk assignment of a default tenant to records without one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Column holding the tenant reference.
    #[serde(default = "default_backfill_column")]
    pub column: String,

    /// Tenant assigned where the column is unset.
    #[serde(default = "default_tenant")]
    pub default_tenant: i64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            column: default_backfill_column(),
            default_tenant: default_tenant(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
        }
    }
}

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TenantryConfig {
    /// Load and validate configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to an empty mapping.
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tenancy.validate()?;

        if !SYMBOLIC_REF.is_match(&self.manager_group) {
            return Err(ConfigError::Config(format!(
                "manager_group '{}' must be a 'module.name' reference",
                self.manager_group
            )));
        }
        if self.external_ids.enabled && self.external_ids.module.trim().is_empty() {
            return Err(ConfigError::Config(
                "external_ids.module must not be empty".to_string(),
            ));
        }
        if self.backfill.column.trim().is_empty() {
            return Err(ConfigError::Config(
                "backfill.column must not be empty".to_string(),
            ));
        }
        if self.backfill.default_tenant <= 0 {
            return Err(ConfigError::Config(format!(
                "backfill.default_tenant must be positive, got {}",
                self.backfill.default_tenant
            )));
        }
        Ok(())
    }

    /// Split `manager_group` into `(module, name)`.
    pub fn manager_group_ref(&self) -> Option<(&str, &str)> {
        self.manager_group.split_once('.')
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_manager_group() -> String {
    "multicompany_instead_of_multidatabase.group_company_manager".to_string()
}

fn default_external_id_module() -> String {
    "__multicompany_instead_of_multidatabase__".to_string()
}

fn default_backfill_column() -> String {
    "company_id".to_string()
}

fn default_tenant() -> i64 {
    1
}

fn default_log_filter() -> String {
    "info".to_string()
}
