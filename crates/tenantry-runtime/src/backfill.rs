//! Assign the default tenant wherever the tenant reference is unset.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use tenantry_core::BackfillConfig;

use crate::error::ReconcileError;
use crate::store::SchemaChannel;

const TABLE_SAVEPOINT: &str = "tenantry_backfill_table";

static PLAIN_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid regex")
});

/// Whether `name` can be placed in a statement without quoting.
pub fn is_plain_identifier(name: &str) -> bool {
    PLAIN_IDENTIFIER.is_match(name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableBackfill {
    pub table: String,
    pub rows: u64,
}

/// A table whose update was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableFailure {
    pub table: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub column: String,
    pub tenant: i64,
    pub tables: Vec<TableBackfill>,
    /// Tables skipped because their name is not a plain identifier.
    pub skipped: Vec<String>,
    pub failed: Vec<TableFailure>,
}

impl BackfillReport {
    pub fn rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

/// Set the configured column to the default tenant on every row where it is
/// null, across every table carrying the column. Non-null values are never
/// touched. Each table is updated under its own savepoint; a table whose
/// update fails is rolled back and reported without stopping the others.
pub async fn backfill_tenant_references<C: SchemaChannel + ?Sized>(
    channel: &C,
    config: &BackfillConfig,
) -> Result<BackfillReport, ReconcileError> {
    if !is_plain_identifier(&config.column) {
        return Err(ReconcileError::InvalidIdentifier(config.column.clone()));
    }

    let tables = channel.tables_with_column(&config.column).await?;
    tracing::debug!(column = %config.column, tables = ?tables, "backfill tables");

    let mut report = BackfillReport {
        column: config.column.clone(),
        tenant: config.default_tenant,
        ..Default::default()
    };

    for table in tables {
        if !is_plain_identifier(&table) {
            tracing::warn!(table = %table, "skipping table with unusual name");
            report.skipped.push(table);
            continue;
        }
        channel.savepoint(TABLE_SAVEPOINT).await?;
        match channel
            .fill_null_column(&table, &config.column, config.default_tenant)
            .await
        {
            Ok(rows) => {
                channel.release_savepoint(TABLE_SAVEPOINT).await?;
                tracing::debug!(table = %table, rows, "backfilled");
                report.tables.push(TableBackfill { table, rows });
            }
            Err(err) => {
                channel.rollback_to_savepoint(TABLE_SAVEPOINT).await?;
                tracing::error!(table = %table, error = %format!("{:#}", err), "backfill of table failed");
                report.failed.push(TableFailure {
                    table,
                    message: format!("{:#}", err),
                });
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_identifiers() {
        assert!(is_plain_identifier("sale_order"));
        assert!(is_plain_identifier("_tmp1"));
        assert!(!is_plain_identifier("1table"));
        assert!(!is_plain_identifier("res_partner; DROP TABLE x"));
        assert!(!is_plain_identifier("\"quoted\""));
        assert!(!is_plain_identifier(""));
    }
}
