//! Mapping of generated record kinds onto the host tables.

use sqlx::{Postgres, QueryBuilder};
use tenantry_runtime::{Criterion, FieldValue, RecordKind};

/// Relation table linking rules to actor groups.
pub const RULE_GROUP_REL: &str = "rule_group_rel";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    /// Integer foreign key or primary key.
    Id,
    Bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

const fn column(name: &'static str, ty: ColumnType) -> Column {
    Column { name, ty }
}

/// Storage layout of one record kind.
#[derive(Debug)]
pub struct TableSpec {
    pub table: &'static str,
    pub columns: &'static [Column],
    /// To-many `groups` field stored in [`RULE_GROUP_REL`].
    pub has_groups: bool,
}

const RULE_TABLE: TableSpec = TableSpec {
    table: "ir_rule",
    columns: &[
        column("name", ColumnType::Text),
        column("model_id", ColumnType::Id),
        column("domain_force", ColumnType::Text),
        column("perm_read", ColumnType::Bool),
        column("perm_write", ColumnType::Bool),
        column("perm_create", ColumnType::Bool),
        column("perm_unlink", ColumnType::Bool),
    ],
    has_groups: true,
};

const ACCESS_TABLE: TableSpec = TableSpec {
    table: "ir_model_access",
    columns: &[
        column("name", ColumnType::Text),
        column("model_id", ColumnType::Id),
        column("group_id", ColumnType::Id),
        column("perm_read", ColumnType::Bool),
        column("perm_write", ColumnType::Bool),
        column("perm_create", ColumnType::Bool),
        column("perm_unlink", ColumnType::Bool),
    ],
    has_groups: false,
};

pub const GROUPS_FIELD: &str = "groups";
/// Archive flag carried by both generated tables.
pub const ACTIVE_FIELD: &str = "active";

impl TableSpec {
    pub fn for_kind(kind: RecordKind) -> &'static TableSpec {
        match kind {
            RecordKind::Rule => &RULE_TABLE,
            RecordKind::AccessGrant => &ACCESS_TABLE,
        }
    }

    pub fn column(&self, name: &str) -> anyhow::Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| anyhow::anyhow!("{} has no column '{}'", self.table, name))
    }

    fn require_groups(&self, field: &str) -> anyhow::Result<()> {
        if self.has_groups && field == GROUPS_FIELD {
            Ok(())
        } else {
            Err(anyhow::anyhow!("{} has no relation '{}'", self.table, field))
        }
    }

    /// Select expression for a column; ids are widened to int8.
    pub fn select_expr(column: &Column) -> String {
        match column.ty {
            ColumnType::Id => format!("t.\"{0}\"::int8 AS \"{0}\"", column.name),
            _ => format!("t.\"{0}\" AS \"{0}\"", column.name),
        }
    }

    /// `SELECT t.id FROM <table> t WHERE t.active AND <criteria> ORDER BY t.id`.
    ///
    /// Archived rows are excluded, as the host's own search does.
    pub fn search_query(&self, criteria: &[Criterion]) -> anyhow::Result<QueryBuilder<'static, Postgres>> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT t.id::int8 AS id FROM {} AS t WHERE t.{}",
            quote_ident(self.table)?,
            quote_ident(ACTIVE_FIELD)?
        ));

        for criterion in criteria {
            qb.push(" AND ");
            match criterion {
                Criterion::Eq(field, value) => {
                    let column = self.column(field)?;
                    qb.push(format!("t.{}", quote_ident(column.name)?));
                    match value {
                        FieldValue::Null => {
                            qb.push(" IS NULL");
                        }
                        value => {
                            qb.push(" = ");
                            push_bind_value(&mut qb, column, value)?;
                        }
                    }
                }
                Criterion::IsEmpty(field) => {
                    self.require_groups(field)?;
                    qb.push(format!(
                        "NOT EXISTS (SELECT 1 FROM {} r WHERE r.rule_group_id = t.id)",
                        RULE_GROUP_REL
                    ));
                }
                Criterion::Contains(field, id) => {
                    self.require_groups(field)?;
                    qb.push(format!(
                        "EXISTS (SELECT 1 FROM {} r WHERE r.rule_group_id = t.id AND r.group_id = ",
                        RULE_GROUP_REL
                    ));
                    qb.push_bind(*id);
                    qb.push(")");
                }
            }
        }

        qb.push(" ORDER BY t.id");
        Ok(qb)
    }
}

/// Bind a scalar value for `column`, checking it has the column's type.
pub fn push_bind_value(
    qb: &mut QueryBuilder<'static, Postgres>,
    column: &Column,
    value: &FieldValue,
) -> anyhow::Result<()> {
    match (column.ty, value) {
        (ColumnType::Text, FieldValue::Text(s)) => {
            qb.push_bind(s.clone());
        }
        (ColumnType::Text, FieldValue::Null) => {
            qb.push_bind(Option::<String>::None);
        }
        (ColumnType::Id, FieldValue::Ref(id) | FieldValue::Int(id)) => {
            qb.push_bind(*id);
        }
        (ColumnType::Id, FieldValue::Null) => {
            qb.push_bind(Option::<i64>::None);
        }
        (ColumnType::Bool, FieldValue::Bool(b)) => {
            qb.push_bind(*b);
        }
        (ty, value) => {
            return Err(anyhow::anyhow!(
                "value {} does not fit column '{}' of type {:?}",
                value,
                column.name,
                ty
            ));
        }
    }
    Ok(())
}

pub fn quote_ident(ident: &str) -> anyhow::Result<String> {
    if ident.is_empty() {
        return Err(anyhow::anyhow!("empty identifier"));
    }
    if !ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(anyhow::anyhow!("invalid identifier '{}'", ident));
    }
    Ok(format!("\"{}\"", ident))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavepointOp {
    Open,
    Release,
    Rollback,
}

pub fn savepoint_sql(op: SavepointOp, name: &str) -> anyhow::Result<String> {
    let name = quote_ident(name)?;
    Ok(match op {
        SavepointOp::Open => format!("SAVEPOINT {}", name),
        SavepointOp::Release => format!("RELEASE SAVEPOINT {}", name),
        SavepointOp::Rollback => format!("ROLLBACK TO SAVEPOINT {}", name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("ir_rule").unwrap(), "\"ir_rule\"");
        assert!(quote_ident("").is_err());
        assert!(quote_ident("x; drop table y").is_err());
    }

    #[test]
    fn test_rule_search_sql() {
        let spec = TableSpec::for_kind(RecordKind::Rule);
        let qb = spec
            .search_query(&[
                Criterion::eq("name", FieldValue::text("sale.order - company_model, read_and_edit_if")),
                Criterion::eq("model_id", FieldValue::Ref(12)),
                Criterion::IsEmpty("groups".into()),
            ])
            .unwrap();

        assert_eq!(
            qb.sql(),
            "SELECT t.id::int8 AS id FROM \"ir_rule\" AS t WHERE t.\"active\" \
             AND t.\"name\" = $1 AND t.\"model_id\" = $2 \
             AND NOT EXISTS (SELECT 1 FROM rule_group_rel r WHERE r.rule_group_id = t.id) \
             ORDER BY t.id"
        );
    }

    #[test]
    fn test_search_skips_archived_rows() {
        for kind in [RecordKind::Rule, RecordKind::AccessGrant] {
            let qb = TableSpec::for_kind(kind).search_query(&[]).unwrap();
            assert!(qb.sql().contains("WHERE t.\"active\""), "{}", qb.sql());
        }
    }

    #[test]
    fn test_savepoint_sql() {
        assert_eq!(
            savepoint_sql(SavepointOp::Open, "tenantry_entity").unwrap(),
            "SAVEPOINT \"tenantry_entity\""
        );
        assert_eq!(
            savepoint_sql(SavepointOp::Release, "tenantry_entity").unwrap(),
            "RELEASE SAVEPOINT \"tenantry_entity\""
        );
        assert_eq!(
            savepoint_sql(SavepointOp::Rollback, "tenantry_entity").unwrap(),
            "ROLLBACK TO SAVEPOINT \"tenantry_entity\""
        );
        assert!(savepoint_sql(SavepointOp::Open, "x; COMMIT").is_err());
    }

    #[test]
    fn test_group_membership_search_sql() {
        let spec = TableSpec::for_kind(RecordKind::Rule);
        let qb = spec
            .search_query(&[Criterion::Contains("groups".into(), 4)])
            .unwrap();
        assert!(qb.sql().contains("r.group_id = $1)"));
    }

    #[test]
    fn test_access_table_has_no_groups_relation() {
        let spec = TableSpec::for_kind(RecordKind::AccessGrant);
        assert!(spec.search_query(&[Criterion::IsEmpty("groups".into())]).is_err());
        assert!(spec
            .search_query(&[Criterion::eq("domain_force", FieldValue::text("[]"))])
            .is_err());
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let spec = TableSpec::for_kind(RecordKind::AccessGrant);
        assert!(spec
            .search_query(&[Criterion::eq("perm_read", FieldValue::text("yes"))])
            .is_err());
    }
}
