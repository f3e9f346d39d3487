//! Predicate templates per security class.

use serde::Serialize;
use tenantry_core::{AccessMode, PermissionBits, SecurityClass, TenancyConfig};
use tenantry_domain::{Filter, Predicate, RenderContext};

use crate::error::PolicyError;

/// One generated rule of a security class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuleTemplate {
    pub mode: AccessMode,
    pub predicate: &'static str,
}

const fn template(mode: AccessMode, predicate: &'static str) -> RuleTemplate {
    RuleTemplate { mode, predicate }
}

const IN_SELECTED_HIERARCHY: &str = "allowed_companies AND selected_company/parent/child";
const SYSTEM_EDIT: &str = "system_company AND ( allowed_companies AND selected_company )";

const TENANTS: &[RuleTemplate] = &[
    template(AccessMode::Read, "allowed_companies"),
    template(AccessMode::Edit, IN_SELECTED_HIERARCHY),
];

// Partners without a tenant are readable by everyone.
const SHARED_PARTNER: &[RuleTemplate] = &[
    template(
        AccessMode::Read,
        "false OR ( allowed_companies AND selected_company/parent/child )",
    ),
    template(AccessMode::Edit, IN_SELECTED_HIERARCHY),
];

const TENANT_SCOPED: &[RuleTemplate] = &[template(AccessMode::ReadAndEdit, IN_SELECTED_HIERARCHY)];

const TENANT_SCOPED_READ_SHARED: &[RuleTemplate] = &[
    template(
        AccessMode::Read,
        "system_company OR ( allowed_companies AND selected_company/parent/child )",
    ),
    template(AccessMode::Edit, IN_SELECTED_HIERARCHY),
];

const GLOBAL_READ_SHARED: &[RuleTemplate] = &[
    template(AccessMode::Read, "system_company"),
    template(AccessMode::Edit, SYSTEM_EDIT),
];

const NO_ACCESS: &[RuleTemplate] = &[template(AccessMode::ReadAndEdit, SYSTEM_EDIT)];

/// The rule templates of a security class.
pub fn rule_templates(class: SecurityClass) -> &'static [RuleTemplate] {
    match class {
        SecurityClass::Tenants => TENANTS,
        SecurityClass::SharedPartner => SHARED_PARTNER,
        SecurityClass::TenantScoped => TENANT_SCOPED,
        SecurityClass::TenantScopedReadShared => TENANT_SCOPED_READ_SHARED,
        SecurityClass::GlobalReadShared => GLOBAL_READ_SHARED,
        SecurityClass::NoAccess => NO_ACCESS,
    }
}

/// A template compiled for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledRule {
    pub entity: String,
    pub class: SecurityClass,
    pub mode: AccessMode,
    pub permissions: PermissionBits,
    pub tenant_field: String,
    pub filter: Filter,
}

impl CompiledRule {
    /// The rendered domain string stored on the rule.
    pub fn domain(&self) -> String {
        self.filter.to_domain_string()
    }
}

/// Compile every template of `class` for `entity`.
///
/// Fails on the first predicate that does not compile; no partial rule set
/// is returned.
pub fn compile_entity_rules(
    entity: &str,
    class: SecurityClass,
    tenancy: &TenancyConfig,
) -> Result<Vec<CompiledRule>, PolicyError> {
    rule_templates(class)
        .iter()
        .map(|t| {
            let tenant_field = tenancy.tenant_field(entity, t.mode);
            let ctx = RenderContext::new(tenant_field, tenancy.system_tenant);
            let filter =
                Predicate::render(t.predicate, &ctx).map_err(|source| PolicyError::Predicate {
                    entity: entity.to_string(),
                    class,
                    mode: t.mode,
                    predicate: t.predicate.to_string(),
                    source,
                })?;

            Ok(CompiledRule {
                entity: entity.to_string(),
                class,
                mode: t.mode,
                permissions: t.mode.permissions(),
                tenant_field: tenant_field.to_string(),
                filter,
            })
        })
        .collect()
}
