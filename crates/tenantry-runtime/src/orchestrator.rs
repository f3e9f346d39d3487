//! Bootstrap entry point: reconcile every entity type, then backfill.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use tenantry_core::TenantryConfig;
use tenantry_policy::Classifier;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::backfill::{backfill_tenant_references, BackfillReport};
use crate::error::ReconcileError;
use crate::outcome::ReconcileSummary;
use crate::reconcile::Reconciler;
use crate::store::{RecordStore, SchemaChannel};

const RECONCILE_SAVEPOINT: &str = "tenantry_reconcile";
const BACKFILL_SAVEPOINT: &str = "tenantry_backfill";

/// Everything one bootstrap run did and everything that went wrong.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Absent when the catalog could not be listed.
    pub reconcile: Option<ReconcileSummary>,
    /// Absent when the backfill is disabled or failed.
    pub backfill: Option<BackfillReport>,
    pub errors: Vec<String>,
}

impl BootstrapReport {
    /// No errors, conflicts or entity failures.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
            && self
                .reconcile
                .as_ref()
                .is_some_and(|summary| !summary.has_problems())
    }
}

pub struct Orchestrator<S: RecordStore + SchemaChannel, A: AuditSink> {
    store: S,
    audit: A,
    classifier: Classifier,
    config: TenantryConfig,
}

impl<S: RecordStore + SchemaChannel, A: AuditSink> Orchestrator<S, A> {
    pub fn new(store: S, audit: A, config: TenantryConfig) -> Self {
        Self {
            store,
            audit,
            classifier: Classifier::builtin().clone(),
            config,
        }
    }

    /// Replace the built-in classification.
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> (S, A) {
        (self.store, self.audit)
    }

    /// Secure the store. Never fails: errors are logged and collected in the
    /// report so the surrounding initialization is never blocked.
    pub async fn secure(&self) -> BootstrapReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut errors = Vec::new();
        tracing::info!(%run_id, "securing record store");

        let reconciler = Reconciler::new(
            &self.store,
            &self.audit,
            &self.classifier,
            &self.config,
            run_id,
        );
        let reconcile = match self
            .within_savepoint(RECONCILE_SAVEPOINT, reconciler.reconcile_all())
            .await
        {
            Ok(summary) => {
                if summary.manager_group.is_none() {
                    errors.push(format!(
                        "manager group {} not found; manager records skipped",
                        self.config.manager_group
                    ));
                }
                Some(summary)
            }
            Err(err) => {
                tracing::error!(error = %err, "reconciliation aborted");
                errors.push(format!("reconciliation aborted: {:#}", err));
                None
            }
        };

        let backfill = if self.config.backfill.enabled {
            let backfill = backfill_tenant_references(&self.store, &self.config.backfill);
            match self.within_savepoint(BACKFILL_SAVEPOINT, backfill).await {
                Ok(report) => {
                    for failure in &report.failed {
                        errors.push(format!(
                            "backfill of {} failed: {}",
                            failure.table, failure.message
                        ));
                    }
                    for table in report.tables.iter().filter(|t| t.rows > 0) {
                        self.audit.record(
                            AuditEvent::new(run_id, AuditAction::Backfilled, &table.table)
                                .with_detail(serde_json::json!({
                                    "column": report.column,
                                    "tenant": report.tenant,
                                    "rows": table.rows,
                                })),
                        );
                    }
                    Some(report)
                }
                Err(err) => {
                    tracing::error!(error = %err, "backfill failed");
                    errors.push(format!("backfill failed: {:#}", err));
                    None
                }
            }
        } else {
            tracing::debug!("backfill disabled");
            None
        };

        let report = BootstrapReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            reconcile,
            backfill,
            errors,
        };
        log_report(&report);
        report
    }

    /// Run `work` under a savepoint, rolling back to it when `work` fails so
    /// the store's unit of work stays usable for what follows.
    async fn within_savepoint<T, F>(&self, name: &str, work: F) -> Result<T, ReconcileError>
    where
        F: Future<Output = Result<T, ReconcileError>>,
    {
        self.store.savepoint(name).await?;
        match work.await {
            Ok(value) => {
                self.store.release_savepoint(name).await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.store.rollback_to_savepoint(name).await {
                    tracing::error!(savepoint = name, error = %format!("{:#}", rollback), "rollback failed");
                }
                Err(err)
            }
        }
    }
}

fn log_report(report: &BootstrapReport) {
    let (created, updated, removed, conflicts, failures, collisions) = report
        .reconcile
        .as_ref()
        .map(|s| {
            (
                s.created,
                s.updated,
                s.duplicates_removed,
                s.conflicts.len(),
                s.failures.len(),
                s.identifier_collisions.len(),
            )
        })
        .unwrap_or_default();
    let backfilled = report.backfill.as_ref().map(BackfillReport::rows).unwrap_or(0);
    let elapsed_ms = (report.finished_at - report.started_at).num_milliseconds();

    if report.is_clean() {
        tracing::info!(
            run_id = %report.run_id,
            created,
            updated,
            removed,
            collisions,
            backfilled,
            elapsed_ms,
            "record store secured"
        );
    } else {
        tracing::warn!(
            run_id = %report.run_id,
            created,
            updated,
            removed,
            conflicts,
            failures,
            collisions,
            backfilled,
            errors = ?report.errors,
            elapsed_ms,
            "record store secured with problems"
        );
    }
}
