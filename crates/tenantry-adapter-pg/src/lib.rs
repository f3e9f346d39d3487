//! Postgres implementation of the runtime's storage seams.
//!
//! Every call runs inside one transaction owned by the store, opened by
//! [`PostgresStore::begin`] and closed by [`PostgresStore::commit`] or
//! [`PostgresStore::rollback`]. The runtime scopes each entity type and the
//! backfill with savepoints, so a failed statement rolls back only its own
//! scope instead of aborting the whole transaction.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use std::collections::BTreeMap;
use tenantry_core::{DatabaseConfig, EntityType, RecordId};
use tenantry_runtime::{
    Criterion, ExternalRef, FieldValue, RecordKind, RecordStore, Savepoints, Values,
};
use tokio::sync::Mutex;

pub mod introspect;
pub mod schema;

use schema::{
    push_bind_value, quote_ident, savepoint_sql, ColumnType, SavepointOp, TableSpec, GROUPS_FIELD,
    RULE_GROUP_REL,
};

pub struct PostgresStore {
    pool: PgPool,
    tx: Mutex<Transaction<'static, Postgres>>,
}

impl PostgresStore {
    /// Connect and open the transaction all calls will share.
    pub async fn begin(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await?;
        let tx = pool.begin().await?;
        tracing::debug!(database = %config.database, "transaction opened");
        Ok(Self {
            pool,
            tx: Mutex::new(tx),
        })
    }

    pub async fn commit(self) -> anyhow::Result<()> {
        self.tx.into_inner().commit().await?;
        self.pool.close().await;
        tracing::debug!("transaction committed");
        Ok(())
    }

    pub async fn rollback(self) -> anyhow::Result<()> {
        self.tx.into_inner().rollback().await?;
        self.pool.close().await;
        tracing::debug!("transaction rolled back");
        Ok(())
    }

    async fn execute_savepoint(&self, op: SavepointOp, name: &str) -> anyhow::Result<()> {
        let sql = savepoint_sql(op, name)?;
        let mut tx = self.tx.lock().await;
        sqlx::query(&sql).execute(&mut **tx).await?;
        tracing::trace!(statement = %sql, "savepoint");
        Ok(())
    }

    async fn replace_groups(&self, rule: RecordId, groups: &[RecordId]) -> anyhow::Result<()> {
        let mut tx = self.tx.lock().await;
        sqlx::query(&format!(
            "DELETE FROM {} WHERE rule_group_id = $1",
            RULE_GROUP_REL
        ))
        .bind(rule)
        .execute(&mut **tx)
        .await?;

        if !groups.is_empty() {
            sqlx::query(&format!(
                "INSERT INTO {} (rule_group_id, group_id) SELECT $1, g FROM unnest($2::int8[]) AS g",
                RULE_GROUP_REL
            ))
            .bind(rule)
            .bind(groups)
            .execute(&mut **tx)
            .await?;
        }

        sqlx::query(r#"UPDATE ir_rule SET "global" = $2 WHERE id = $1"#)
            .bind(rule)
            .bind(groups.is_empty())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

fn groups_value(values: &Values) -> anyhow::Result<Option<Vec<RecordId>>> {
    match values.get(GROUPS_FIELD) {
        None => Ok(None),
        Some(FieldValue::Refs(ids)) => Ok(Some(ids.clone())),
        Some(FieldValue::Null) => Ok(Some(Vec::new())),
        Some(other) => Err(anyhow::anyhow!("groups must be a set of ids, got {}", other)),
    }
}

#[async_trait]
impl Savepoints for PostgresStore {
    async fn savepoint(&self, name: &str) -> anyhow::Result<()> {
        self.execute_savepoint(SavepointOp::Open, name).await
    }

    async fn release_savepoint(&self, name: &str) -> anyhow::Result<()> {
        self.execute_savepoint(SavepointOp::Release, name).await
    }

    async fn rollback_to_savepoint(&self, name: &str) -> anyhow::Result<()> {
        self.execute_savepoint(SavepointOp::Rollback, name).await?;
        self.execute_savepoint(SavepointOp::Release, name).await
    }
}

#[async_trait]
impl RecordStore for PostgresStore {
    async fn entity_types(&self) -> anyhow::Result<Vec<EntityType>> {
        let mut tx = self.tx.lock().await;
        let rows = sqlx::query("SELECT id::int8 AS id, model FROM ir_model ORDER BY model")
            .fetch_all(&mut **tx)
            .await?;
        rows.into_iter()
            .map(|r| -> anyhow::Result<EntityType> {
                Ok(EntityType::new(r.try_get("id")?, r.try_get::<String, _>("model")?))
            })
            .collect()
    }

    async fn resolve_group(&self, module: &str, name: &str) -> anyhow::Result<Option<RecordId>> {
        let mut tx = self.tx.lock().await;
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT res_id::int8 FROM ir_model_data WHERE module = $1 AND name = $2 AND model = 'res.groups'",
        )
        .bind(module)
        .bind(name)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(id)
    }

    async fn search(
        &self,
        kind: RecordKind,
        criteria: &[Criterion],
    ) -> anyhow::Result<Vec<RecordId>> {
        let mut qb = TableSpec::for_kind(kind).search_query(criteria)?;
        let mut tx = self.tx.lock().await;
        let ids: Vec<i64> = qb.build_query_scalar::<i64>().fetch_all(&mut **tx).await?;
        Ok(ids)
    }

    async fn read(
        &self,
        kind: RecordKind,
        ids: &[RecordId],
        fields: &[&str],
    ) -> anyhow::Result<Vec<Values>> {
        let spec = TableSpec::for_kind(kind);
        let mut columns = Vec::new();
        let mut want_groups = false;
        for field in fields {
            if spec.has_groups && *field == GROUPS_FIELD {
                want_groups = true;
            } else {
                columns.push(spec.column(field)?);
            }
        }

        let mut select = vec!["t.id::int8 AS id".to_string()];
        select.extend(columns.iter().map(|c| TableSpec::select_expr(c)));
        let sql = format!(
            "SELECT {} FROM {} AS t WHERE t.id = ANY($1)",
            select.join(", "),
            quote_ident(spec.table)?
        );

        let mut tx = self.tx.lock().await;
        let rows = sqlx::query(&sql).bind(ids).fetch_all(&mut **tx).await?;

        let mut by_id: BTreeMap<RecordId, Values> = BTreeMap::new();
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let mut values = Values::new();
            for column in &columns {
                let value = match column.ty {
                    ColumnType::Text => row
                        .try_get::<Option<String>, _>(column.name)?
                        .map_or(FieldValue::Null, FieldValue::Text),
                    ColumnType::Id => row
                        .try_get::<Option<i64>, _>(column.name)?
                        .map_or(FieldValue::Null, FieldValue::Ref),
                    ColumnType::Bool => row
                        .try_get::<Option<bool>, _>(column.name)?
                        .map_or(FieldValue::Null, FieldValue::Bool),
                };
                values.insert(column.name.to_string(), value);
            }
            by_id.insert(id, values);
        }

        if want_groups {
            let links: Vec<(i64, i64)> = sqlx::query_as(&format!(
                "SELECT rule_group_id::int8, group_id::int8 FROM {} WHERE rule_group_id = ANY($1)",
                RULE_GROUP_REL
            ))
            .bind(ids)
            .fetch_all(&mut **tx)
            .await?;

            let mut groups: BTreeMap<RecordId, Vec<RecordId>> = BTreeMap::new();
            for (rule, group) in links {
                groups.entry(rule).or_default().push(group);
            }
            for (id, values) in by_id.iter_mut() {
                let set = groups.remove(id).unwrap_or_default();
                values.insert(GROUPS_FIELD.to_string(), FieldValue::refs(set));
            }
        }

        ids.iter()
            .map(|id| {
                by_id
                    .get(id)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("{} record {} does not exist", kind, id))
            })
            .collect()
    }

    async fn create(&self, kind: RecordKind, values: &Values) -> anyhow::Result<RecordId> {
        let spec = TableSpec::for_kind(kind);
        let mut qb = QueryBuilder::<Postgres>::new(format!("INSERT INTO {} (", quote_ident(spec.table)?));
        let mut bound = Vec::new();
        for (field, value) in values {
            if spec.has_groups && field == GROUPS_FIELD {
                continue;
            }
            bound.push((spec.column(field)?, value));
        }

        for (column, _) in &bound {
            qb.push(format!("{}, ", quote_ident(column.name)?));
        }
        qb.push("active) VALUES (");
        for (column, value) in &bound {
            push_bind_value(&mut qb, column, value)?;
            qb.push(", ");
        }
        qb.push("TRUE) RETURNING id::int8");

        let id: i64 = {
            let mut tx = self.tx.lock().await;
            qb.build_query_scalar::<i64>().fetch_one(&mut **tx).await?
        };

        if let Some(groups) = groups_value(values)? {
            self.replace_groups(id, &groups).await?;
        }
        tracing::trace!(table = spec.table, id, "inserted");
        Ok(id)
    }

    async fn write(&self, kind: RecordKind, id: RecordId, values: &Values) -> anyhow::Result<()> {
        let spec = TableSpec::for_kind(kind);
        let mut qb = QueryBuilder::<Postgres>::new(format!("UPDATE {} SET ", quote_ident(spec.table)?));
        let mut any = false;
        for (field, value) in values {
            if spec.has_groups && field == GROUPS_FIELD {
                continue;
            }
            let column = spec.column(field)?;
            if any {
                qb.push(", ");
            }
            qb.push(format!("{} = ", quote_ident(column.name)?));
            push_bind_value(&mut qb, column, value)?;
            any = true;
        }
        qb.push(" WHERE id = ");
        qb.push_bind(id);

        if any {
            let mut tx = self.tx.lock().await;
            let result = qb.build().execute(&mut **tx).await?;
            if result.rows_affected() != 1 {
                anyhow::bail!("{} record {} does not exist", kind, id);
            }
        }

        if let Some(groups) = groups_value(values)? {
            self.replace_groups(id, &groups).await?;
        }
        Ok(())
    }

    async fn unlink(&self, kind: RecordKind, ids: &[RecordId]) -> anyhow::Result<()> {
        let spec = TableSpec::for_kind(kind);
        let mut tx = self.tx.lock().await;

        if spec.has_groups {
            sqlx::query(&format!(
                "DELETE FROM {} WHERE rule_group_id = ANY($1)",
                RULE_GROUP_REL
            ))
            .bind(ids)
            .execute(&mut **tx)
            .await?;
        }
        sqlx::query("DELETE FROM ir_model_data WHERE model = $1 AND res_id = ANY($2)")
            .bind(kind.entity())
            .bind(ids)
            .execute(&mut **tx)
            .await?;
        sqlx::query(&format!(
            "DELETE FROM {} WHERE id = ANY($1)",
            quote_ident(spec.table)?
        ))
        .bind(ids)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn find_external_id(
        &self,
        module: &str,
        name: &str,
    ) -> anyhow::Result<Option<ExternalRef>> {
        let mut tx = self.tx.lock().await;
        let row: Option<(String, i64)> = sqlx::query_as(
            "SELECT model, res_id::int8 FROM ir_model_data WHERE module = $1 AND name = $2",
        )
        .bind(module)
        .bind(name)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(|(entity, res_id)| ExternalRef { entity, res_id }))
    }

    async fn create_external_id(
        &self,
        module: &str,
        name: &str,
        target: &ExternalRef,
    ) -> anyhow::Result<()> {
        let mut tx = self.tx.lock().await;
        sqlx::query(
            "INSERT INTO ir_model_data (module, name, model, res_id, noupdate) VALUES ($1, $2, $3, $4, TRUE)",
        )
        .bind(module)
        .bind(name)
        .bind(&target.entity)
        .bind(target.res_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
