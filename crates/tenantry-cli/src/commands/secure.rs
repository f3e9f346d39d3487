//! `tenantry secure` command implementation.

use anyhow::{Context, Result};
use tenantry_adapter_pg::PostgresStore;
use tenantry_core::TenantryConfig;
use tenantry_runtime::{BootstrapReport, InMemoryStore, Orchestrator, TracingAuditSink};

pub async fn run(config: TenantryConfig, dry_run: bool, offline: Vec<String>, json: bool) -> Result<()> {
    let report = if offline.is_empty() {
        run_postgres(config, dry_run).await?
    } else {
        run_offline(config, &offline).await
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.is_clean() {
        anyhow::bail!("secure finished with problems; see the report above");
    }
    Ok(())
}

async fn run_postgres(config: TenantryConfig, dry_run: bool) -> Result<BootstrapReport> {
    let store = PostgresStore::begin(&config.database)
        .await
        .context("Failed to connect to the database")?;
    let orchestrator = Orchestrator::new(store, TracingAuditSink, config);
    let report = orchestrator.secure().await;

    let (store, _) = orchestrator.into_inner();
    if dry_run {
        store.rollback().await.context("Failed to roll back")?;
        tracing::info!("dry run: changes rolled back");
    } else {
        store.commit().await.context("Failed to commit")?;
    }
    Ok(report)
}

async fn run_offline(config: TenantryConfig, entities: &[String]) -> BootstrapReport {
    let store = InMemoryStore::new();
    if let Some((module, name)) = config.manager_group_ref() {
        store.add_group(module, name);
    }
    for entity in entities {
        store.add_entity_type(entity);
    }
    Orchestrator::new(store, TracingAuditSink, config).secure().await
}

fn print_report(report: &BootstrapReport) {
    println!("Run {}", report.run_id);

    if let Some(summary) = &report.reconcile {
        println!(
            "  entity types: {}  created: {}  updated: {}  unchanged: {}  duplicates removed: {}",
            summary.entities,
            summary.created,
            summary.updated,
            summary.unchanged,
            summary.duplicates_removed
        );
        for conflict in &summary.conflicts {
            println!("  CONFLICT {}", conflict);
        }
        for failure in &summary.failures {
            println!("  FAILED {}", failure);
        }
        for collision in &summary.identifier_collisions {
            println!("  WARN {}", collision);
        }
    }

    if let Some(backfill) = &report.backfill {
        println!(
            "  backfill: {} row(s) set to tenant {} across {} table(s)",
            backfill.rows(),
            backfill.tenant,
            backfill.tables.iter().filter(|t| t.rows > 0).count()
        );
        for table in &backfill.skipped {
            println!("  WARN skipped table {}", table);
        }
    }

    for error in &report.errors {
        println!("  ERROR {}", error);
    }
}
