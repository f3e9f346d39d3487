//! Storage seams consumed by the engine.
//!
//! The host record store is an external collaborator. The engine reads and
//! writes generated records only through [`RecordStore`], and runs bulk
//! statements only through [`SchemaChannel`]. Nothing read through either is
//! cached across calls.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tenantry_core::{EntityType, RecordId, ACCESS_ENTITY, RULE_ENTITY};

/// The two kinds of generated records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Row filter rule.
    Rule,
    /// Model-level access grant.
    AccessGrant,
}

impl RecordKind {
    /// Entity type under which records of this kind are stored.
    pub fn entity(&self) -> &'static str {
        match self {
            RecordKind::Rule => RULE_ENTITY,
            RecordKind::AccessGrant => ACCESS_ENTITY,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entity())
    }
}

/// A field value as exchanged with the store.
///
/// Relation fields are collapsed to primary keys: a to-one relation is a
/// [`FieldValue::Ref`], a to-many relation a sorted [`FieldValue::Refs`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Ref(RecordId),
    Refs(Vec<RecordId>),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    /// A to-many value, sorted and deduplicated.
    pub fn refs(ids: impl IntoIterator<Item = RecordId>) -> Self {
        let mut ids: Vec<RecordId> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        FieldValue::Refs(ids)
    }

    pub fn is_empty_relation(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Refs(ids) => ids.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(i) | FieldValue::Ref(i) => write!(f, "{}", i),
            FieldValue::Text(s) => write!(f, "'{}'", s),
            FieldValue::Refs(ids) => write!(f, "{:?}", ids),
        }
    }
}

/// Field name to value.
pub type Values = BTreeMap<String, FieldValue>;

/// One exact-match search condition. Criteria lists are AND-ed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Field equals the value.
    Eq(String, FieldValue),
    /// To-many field holds no ids.
    IsEmpty(String),
    /// To-many field holds the id.
    Contains(String, RecordId),
}

impl Criterion {
    pub fn eq(field: &str, value: FieldValue) -> Self {
        Criterion::Eq(field.to_string(), value)
    }

    /// Whether `values` satisfies this condition. Missing fields read as null.
    pub fn matches(&self, values: &Values) -> bool {
        match self {
            Criterion::Eq(field, expected) => {
                values.get(field).unwrap_or(&FieldValue::Null) == expected
            }
            Criterion::IsEmpty(field) => values
                .get(field)
                .is_none_or(FieldValue::is_empty_relation),
            Criterion::Contains(field, id) => {
                matches!(values.get(field), Some(FieldValue::Refs(ids)) if ids.contains(id))
            }
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::Eq(field, value) => write!(f, "('{}', '=', {})", field, value),
            Criterion::IsEmpty(field) => write!(f, "('{}', '=', [])", field),
            Criterion::Contains(field, id) => write!(f, "('{}', 'in', [{}])", field, id),
        }
    }
}

/// Target of an external identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalRef {
    /// Entity type of the target record.
    pub entity: String,
    pub res_id: RecordId,
}

/// Named rollback scopes nested in the store's unit of work.
///
/// A failed statement inside a savepoint is undone by rolling back to it,
/// leaving the enclosing unit of work usable. Stores without nested scopes
/// keep the no-op defaults.
#[async_trait]
pub trait Savepoints: Send + Sync {
    async fn savepoint(&self, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn release_savepoint(&self, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Undo everything since the savepoint and discard it.
    async fn rollback_to_savepoint(&self, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Record-level access to the host store.
#[async_trait]
pub trait RecordStore: Savepoints {
    /// Every entity type in the host catalog.
    async fn entity_types(&self) -> anyhow::Result<Vec<EntityType>>;

    /// Resolve an actor group by symbolic reference.
    async fn resolve_group(&self, module: &str, name: &str) -> anyhow::Result<Option<RecordId>>;

    /// Ids of active records matching every criterion, ascending. Archived
    /// records are never returned.
    async fn search(&self, kind: RecordKind, criteria: &[Criterion])
        -> anyhow::Result<Vec<RecordId>>;

    /// Read `fields` of each record, in the order of `ids`.
    async fn read(
        &self,
        kind: RecordKind,
        ids: &[RecordId],
        fields: &[&str],
    ) -> anyhow::Result<Vec<Values>>;

    async fn create(&self, kind: RecordKind, values: &Values) -> anyhow::Result<RecordId>;

    /// Overwrite the given fields. To-many fields are replaced, not extended.
    async fn write(&self, kind: RecordKind, id: RecordId, values: &Values) -> anyhow::Result<()>;

    async fn unlink(&self, kind: RecordKind, ids: &[RecordId]) -> anyhow::Result<()>;

    /// Look up an external identifier.
    async fn find_external_id(&self, module: &str, name: &str)
        -> anyhow::Result<Option<ExternalRef>>;

    /// Bind a new external identifier.
    async fn create_external_id(
        &self,
        module: &str,
        name: &str,
        target: &ExternalRef,
    ) -> anyhow::Result<()>;
}

/// Raw statement channel for schema introspection and bulk updates.
#[async_trait]
pub trait SchemaChannel: Savepoints {
    /// Base tables carrying `column`, sorted by name.
    async fn tables_with_column(&self, column: &str) -> anyhow::Result<Vec<String>>;

    /// Set `column` to `value` on every row where it is null. Returns the
    /// number of rows updated.
    async fn fill_null_column(&self, table: &str, column: &str, value: i64)
        -> anyhow::Result<u64>;
}
