//! Desired generated records for one entity type.
//!
//! Each desired record carries its logical key as a list of [`Criterion`]s.
//! The key never includes the filter or the permission bits, so a record
//! whose predicate changed is found and updated instead of duplicated.

use serde::Serialize;
use tenantry_core::{EntityType, PermissionBits, RecordId, SecurityClass};
use tenantry_policy::CompiledRule;

use crate::store::{Criterion, FieldValue, RecordKind, Values};

/// Filter stored on the privileged group's rule.
pub const PERMISSIVE_DOMAIN: &str = "[(1, '=', 1)]";

/// One record the store should contain after reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredRecord {
    pub kind: RecordKind,
    pub name: String,
    /// Logical key used to find existing records.
    pub criteria: Vec<Criterion>,
    /// Full field set of the record.
    pub values: Values,
    /// Stable external identifier name, without module.
    pub external_id: String,
}

impl DesiredRecord {
    /// Field names carried by `values`.
    pub fn fields(&self) -> Vec<&str> {
        self.values.keys().map(String::as_str).collect()
    }
}

fn perm_values(values: &mut Values, perms: PermissionBits) {
    values.insert("perm_read".into(), FieldValue::Bool(perms.read));
    values.insert("perm_write".into(), FieldValue::Bool(perms.write));
    values.insert("perm_create".into(), FieldValue::Bool(perms.create));
    values.insert("perm_unlink".into(), FieldValue::Bool(perms.unlink));
}

/// Name of a global rule: `"<entity> - <class label>, <mode label>"`.
pub fn global_rule_name(entity: &str, class: SecurityClass, rule: &CompiledRule) -> String {
    format!("{} - {}, {}", entity, class.rule_label(), rule.mode.rule_label())
}

/// Global (group-less) rules for an entity type, one per compiled rule.
pub fn global_rules(entity: &EntityType, rules: &[CompiledRule]) -> Vec<DesiredRecord> {
    let underscored = entity.underscored();

    rules
        .iter()
        .map(|rule| {
            let name = global_rule_name(&entity.name, rule.class, rule);

            let mut values = Values::new();
            values.insert("name".into(), FieldValue::text(&name));
            values.insert("model_id".into(), FieldValue::Ref(entity.id));
            values.insert("domain_force".into(), FieldValue::text(rule.domain()));
            values.insert("groups".into(), FieldValue::refs([]));
            perm_values(&mut values, rule.permissions);

            DesiredRecord {
                kind: RecordKind::Rule,
                criteria: vec![
                    Criterion::eq("name", FieldValue::text(&name)),
                    Criterion::eq("model_id", FieldValue::Ref(entity.id)),
                    Criterion::IsEmpty("groups".into()),
                ],
                name,
                values,
                external_id: format!("{}_global_{}_rule", underscored, rule.mode.stem()),
            }
        })
        .collect()
}

/// Access grant and permissive rule for the privileged group.
pub fn manager_records(entity: &EntityType, group: RecordId) -> [DesiredRecord; 2] {
    let underscored = entity.underscored();
    let name = format!("{} - company manager", entity.name);

    let mut grant = Values::new();
    grant.insert("name".into(), FieldValue::text(&name));
    grant.insert("model_id".into(), FieldValue::Ref(entity.id));
    grant.insert("group_id".into(), FieldValue::Ref(group));
    perm_values(&mut grant, PermissionBits::ALL);

    let mut rule = Values::new();
    rule.insert("name".into(), FieldValue::text(&name));
    rule.insert("model_id".into(), FieldValue::Ref(entity.id));
    rule.insert("domain_force".into(), FieldValue::text(PERMISSIVE_DOMAIN));
    rule.insert("groups".into(), FieldValue::refs([group]));
    perm_values(&mut rule, PermissionBits::ALL);

    [
        DesiredRecord {
            kind: RecordKind::AccessGrant,
            name: name.clone(),
            criteria: vec![
                Criterion::eq("name", FieldValue::text(&name)),
                Criterion::eq("model_id", FieldValue::Ref(entity.id)),
                Criterion::eq("group_id", FieldValue::Ref(group)),
            ],
            values: grant,
            external_id: format!("{}_company_manager_access", underscored),
        },
        DesiredRecord {
            kind: RecordKind::Rule,
            criteria: vec![
                Criterion::eq("name", FieldValue::text(&name)),
                Criterion::eq("model_id", FieldValue::Ref(entity.id)),
                Criterion::Contains("groups".into(), group),
            ],
            name,
            values: rule,
            external_id: format!("{}_company_manager_rule", underscored),
        },
    ]
}
