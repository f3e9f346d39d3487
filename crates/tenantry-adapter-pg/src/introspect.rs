//! Schema introspection and the tenant reference backfill statement.

use async_trait::async_trait;
use tenantry_runtime::SchemaChannel;

use crate::schema::quote_ident;
use crate::PostgresStore;

#[async_trait]
impl SchemaChannel for PostgresStore {
    async fn tables_with_column(&self, column: &str) -> anyhow::Result<Vec<String>> {
        let mut tx = self.tx.lock().await;
        let tables: Vec<String> = sqlx::query_scalar(
            r#"
            select t.table_name::text
            from information_schema.tables t
            join information_schema.columns c
              on c.table_schema = t.table_schema
             and c.table_name = t.table_name
            where t.table_type = 'BASE TABLE'
              and t.table_schema = current_schema()
              and c.column_name = $1
            order by t.table_name
            "#,
        )
        .bind(column)
        .fetch_all(&mut **tx)
        .await?;
        Ok(tables)
    }

    async fn fill_null_column(
        &self,
        table: &str,
        column: &str,
        value: i64,
    ) -> anyhow::Result<u64> {
        let column = quote_ident(column)?;
        let sql = format!(
            "UPDATE {} SET {col} = $1 WHERE {col} IS NULL",
            quote_ident(table)?,
            col = column
        );
        let mut tx = self.tx.lock().await;
        let result = sqlx::query(&sql).bind(value).execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }
}
