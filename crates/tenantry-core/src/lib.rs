//! # tenantry-core
//!
//! Vocabulary shared by every Tenantry crate: security classes, access modes,
//! permission bits, entity types, and the YAML configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;

pub use config::{
    BackfillConfig, ConfigError, DatabaseConfig, ExternalIdConfig, ObservabilityConfig,
    TenancyConfig, TenantFieldOverride, TenantryConfig,
};

/// Primary key of a record in the host store.
pub type RecordId = i64;

/// Model name under which generated row rules are stored. Never receives rules itself.
pub const RULE_ENTITY: &str = "ir.rule";

/// Model name under which model-level access grants are stored.
pub const ACCESS_ENTITY: &str = "ir.model.access";

/// An entity type (model) known to the host store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityType {
    /// Primary key of the entity type's catalog record.
    pub id: RecordId,
    /// Canonical dotted name, e.g. `sale.order`.
    pub name: String,
}

impl EntityType {
    pub fn new(id: RecordId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// The dotted name with dots replaced by underscores (`sale.order` -> `sale_order`).
    pub fn underscored(&self) -> String {
        self.name.replace('.', "_")
    }
}

/// Classification bucket controlling which rule templates apply to an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityClass {
    /// The tenant entity itself and the actor entity.
    Tenants,
    /// Partners: readable when unassigned, otherwise tenant scoped.
    SharedPartner,
    /// Default: read and edit within the selected tenant hierarchy.
    TenantScoped,
    /// Shared configuration owned by the system tenant but readable by everyone.
    TenantScopedReadShared,
    /// System data: readable by everyone, editable only from the system tenant.
    GlobalReadShared,
    /// Locked down to the system tenant.
    NoAccess,
}

impl SecurityClass {
    pub const ALL: [SecurityClass; 6] = [
        SecurityClass::Tenants,
        SecurityClass::SharedPartner,
        SecurityClass::TenantScoped,
        SecurityClass::TenantScopedReadShared,
        SecurityClass::GlobalReadShared,
        SecurityClass::NoAccess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityClass::Tenants => "tenants",
            SecurityClass::SharedPartner => "shared_partner",
            SecurityClass::TenantScoped => "tenant_scoped",
            SecurityClass::TenantScopedReadShared => "tenant_scoped_read_shared",
            SecurityClass::GlobalReadShared => "global_read_shared",
            SecurityClass::NoAccess => "no_access",
        }
    }

    /// Label embedded in persisted rule names.
    ///
    /// These strings are part of the logical key of rules already stored by
    /// earlier deployments and must not change.
    pub fn rule_label(&self) -> &'static str {
        match self {
            SecurityClass::Tenants => "companies_model",
            SecurityClass::SharedPartner => "partner_model",
            SecurityClass::TenantScoped => "company_model",
            SecurityClass::TenantScopedReadShared => "company_read_system_model",
            SecurityClass::GlobalReadShared => "read_system_model",
            SecurityClass::NoAccess => "no_access_model",
        }
    }
}

impl fmt::Display for SecurityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which operations a generated rule governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    Edit,
    ReadAndEdit,
}

impl AccessMode {
    /// Label embedded in persisted rule names (`read_if`, `edit_if`, `read_and_edit_if`).
    pub fn rule_label(&self) -> &'static str {
        match self {
            AccessMode::Read => "read_if",
            AccessMode::Edit => "edit_if",
            AccessMode::ReadAndEdit => "read_and_edit_if",
        }
    }

    /// Stem used in external identifiers (`read`, `edit`, `read_and_edit`).
    pub fn stem(&self) -> &'static str {
        match self {
            AccessMode::Read => "read",
            AccessMode::Edit => "edit",
            AccessMode::ReadAndEdit => "read_and_edit",
        }
    }

    pub fn permissions(&self) -> PermissionBits {
        match self {
            AccessMode::Read => PermissionBits::READ_ONLY,
            AccessMode::Edit => PermissionBits::EDIT_ONLY,
            AccessMode::ReadAndEdit => PermissionBits::ALL,
        }
    }

    /// Whether the mode includes reading.
    pub fn reads(&self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::ReadAndEdit)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stem())
    }
}

/// Read/write/create/delete flags enforced by the host store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionBits {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub unlink: bool,
}

impl PermissionBits {
    pub const READ_ONLY: PermissionBits = PermissionBits {
        read: true,
        write: false,
        create: false,
        unlink: false,
    };

    pub const EDIT_ONLY: PermissionBits = PermissionBits {
        read: false,
        write: true,
        create: true,
        unlink: true,
    };

    pub const ALL: PermissionBits = PermissionBits {
        read: true,
        write: true,
        create: true,
        unlink: true,
    };
}
