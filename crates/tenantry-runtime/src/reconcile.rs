//! Find-or-create-or-update of generated records.
//!
//! Every desired record is located by its logical key. No match creates it,
//! one match is diffed and written only when a field differs, several
//! matches are collapsed when they are identical and reported as a
//! [`ConflictError`] otherwise. Running the pass twice in a row performs no
//! mutation the second time.

use std::collections::BTreeSet;
use tenantry_core::{EntityType, RecordId, TenantryConfig, RULE_ENTITY};
use tenantry_policy::{compile_entity_rules, Classifier};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::desired::{global_rules, manager_records, DesiredRecord};
use crate::error::ReconcileError;
use crate::external_id::{register_external_id, Registration};
use crate::outcome::{
    ConflictError, EntityOutcome, Failure, FailureKind, ReconcileSummary, RecordOutcome,
    RecordReport,
};
use crate::store::{FieldValue, RecordStore, Values};

/// Scope of one entity type's writes.
const ENTITY_SAVEPOINT: &str = "tenantry_entity";

pub struct Reconciler<'a, S: RecordStore + ?Sized, A: AuditSink + ?Sized> {
    store: &'a S,
    audit: &'a A,
    classifier: &'a Classifier,
    config: &'a TenantryConfig,
    run_id: Uuid,
}

impl<'a, S: RecordStore + ?Sized, A: AuditSink + ?Sized> Reconciler<'a, S, A> {
    pub fn new(
        store: &'a S,
        audit: &'a A,
        classifier: &'a Classifier,
        config: &'a TenantryConfig,
        run_id: Uuid,
    ) -> Self {
        Self {
            store,
            audit,
            classifier,
            config,
            run_id,
        }
    }

    /// Reconcile every entity type in the host catalog.
    ///
    /// Only listing the catalog and resolving the privileged group can fail;
    /// per-entity failures are recorded in the summary.
    pub async fn reconcile_all(&self) -> Result<ReconcileSummary, ReconcileError> {
        let mut entities = self.store.entity_types().await?;
        entities.sort_by(|a, b| a.name.cmp(&b.name));

        let mut summary = ReconcileSummary {
            manager_group: self.resolve_manager_group().await?,
            ..Default::default()
        };

        for entity in entities.iter().filter(|e| e.name != RULE_ENTITY) {
            let outcome = self.reconcile_entity(entity, summary.manager_group).await;
            summary.absorb(outcome);
        }

        tracing::info!(
            entities = summary.entities,
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            duplicates_removed = summary.duplicates_removed,
            conflicts = summary.conflicts.len(),
            failures = summary.failures.len(),
            "reconciliation finished"
        );
        Ok(summary)
    }

    /// Resolve the privileged group. A missing group is logged and yields
    /// `None`; manager records are then skipped.
    pub async fn resolve_manager_group(&self) -> Result<Option<RecordId>, ReconcileError> {
        let Some((module, name)) = self.config.manager_group_ref() else {
            tracing::warn!(reference = %self.config.manager_group, "malformed manager group reference");
            return Ok(None);
        };

        let group = self.store.resolve_group(module, name).await?;
        if group.is_none() {
            tracing::warn!(
                reference = %self.config.manager_group,
                "manager group not found; skipping manager records"
            );
        }
        Ok(group)
    }

    /// Reconcile the generated records of one entity type.
    pub async fn reconcile_entity(
        &self,
        entity: &EntityType,
        manager_group: Option<RecordId>,
    ) -> EntityOutcome {
        let class = self.classifier.classify(&entity.name);
        let mut outcome = EntityOutcome::new(&entity.name, class);

        if entity.name == RULE_ENTITY {
            tracing::debug!(entity_type = %entity.name, "rule entity is never secured");
            return outcome;
        }

        tracing::debug!(entity_type = %entity.name, class = %class, "reconciling");

        let mut desired = Vec::new();
        match compile_entity_rules(&entity.name, class, &self.config.tenancy) {
            Ok(rules) => desired.extend(global_rules(entity, &rules)),
            Err(err) => {
                tracing::error!(entity_type = %entity.name, error = %err, "rule compilation failed");
                outcome.failures.push(Failure {
                    entity: entity.name.clone(),
                    kind: FailureKind::Compile,
                    message: err.to_string(),
                });
            }
        }
        if let Some(group) = manager_group {
            desired.extend(manager_records(entity, group));
        }
        if desired.is_empty() {
            return outcome;
        }

        if let Err(err) = self.store.savepoint(ENTITY_SAVEPOINT).await {
            store_failure(&mut outcome, err);
            return outcome;
        }

        let mut failed = false;
        for record in &desired {
            if let Err(err) = self.reconcile_one(&entity.name, record, &mut outcome).await {
                store_failure(&mut outcome, err);
                failed = true;
                break;
            }
        }

        let closed = if failed {
            self.store.rollback_to_savepoint(ENTITY_SAVEPOINT).await
        } else {
            self.store.release_savepoint(ENTITY_SAVEPOINT).await
        };
        if failed {
            // Nothing written for this entity survives the rollback.
            outcome.records.clear();
            outcome.collisions.clear();
            tracing::warn!(entity_type = %entity.name, "entity changes rolled back");
        }
        if let Err(err) = closed {
            store_failure(&mut outcome, err);
        }

        outcome
    }

    async fn reconcile_one(
        &self,
        entity: &str,
        record: &DesiredRecord,
        outcome: &mut EntityOutcome,
    ) -> Result<(), ReconcileError> {
        let result = self.reconcile_record(entity, record).await?;

        if let (Some(id), true) = (result.id(), self.config.external_ids.enabled) {
            let module = &self.config.external_ids.module;
            match register_external_id(self.store, module, &record.external_id, record.kind, id)
                .await?
            {
                Registration::Created => self.audit.record(
                    AuditEvent::new(self.run_id, AuditAction::ExternalIdRegistered, entity)
                        .with_kind(record.kind)
                        .with_ids([id])
                        .with_detail(serde_json::json!({
                            "module": module,
                            "name": record.external_id,
                        })),
                ),
                Registration::Existing => {}
                Registration::Collision(collision) => {
                    self.audit.record(
                        AuditEvent::new(self.run_id, AuditAction::ExternalIdCollision, entity)
                            .with_kind(record.kind)
                            .with_ids([id])
                            .with_detail(serde_json::json!({
                                "module": collision.module,
                                "name": collision.name,
                                "existing": collision.existing,
                            })),
                    );
                    outcome.collisions.push(collision);
                }
            }
        }

        outcome.records.push(RecordReport {
            kind: record.kind,
            name: record.name.clone(),
            outcome: result,
        });
        Ok(())
    }

    /// Converge one desired record.
    pub async fn reconcile_record(
        &self,
        entity: &str,
        record: &DesiredRecord,
    ) -> Result<RecordOutcome, ReconcileError> {
        let mut ids = self.store.search(record.kind, &record.criteria).await?;
        ids.sort_unstable();

        if ids.is_empty() {
            let id = self.store.create(record.kind, &record.values).await?;
            tracing::debug!(model = %record.kind, name = %record.name, id, "created");
            self.audit.record(
                AuditEvent::new(self.run_id, AuditAction::Created, entity)
                    .with_kind(record.kind)
                    .with_ids([id])
                    .with_detail(serde_json::json!({ "name": record.name })),
            );
            return Ok(RecordOutcome::Created { id });
        }

        let fields = record.fields();
        let rows: Vec<Values> = self
            .store
            .read(record.kind, &ids, &fields)
            .await?
            .into_iter()
            .map(normalized)
            .collect();

        let mut removed = Vec::new();
        if ids.len() > 1 {
            let differing = differing_fields(&rows, &fields);
            if !differing.is_empty() {
                let conflict = ConflictError {
                    model: record.kind,
                    count: ids.len(),
                    criteria: record.criteria.clone(),
                    fields: differing,
                    ids: ids.clone(),
                };
                tracing::error!(
                    severity = "critical",
                    model = %conflict.model,
                    count = conflict.count,
                    criteria = ?conflict.criteria,
                    fields = ?conflict.fields,
                    error = %conflict,
                    "conflicting duplicate records; manual remediation required"
                );
                self.audit.record(
                    AuditEvent::new(self.run_id, AuditAction::ConflictDetected, entity)
                        .with_kind(record.kind)
                        .with_ids(ids)
                        .with_detail(serde_json::json!({ "fields": conflict.fields })),
                );
                return Ok(RecordOutcome::Conflict(conflict));
            }

            removed = ids.split_off(1);
            self.store.unlink(record.kind, &removed).await?;
            tracing::info!(
                model = %record.kind,
                name = %record.name,
                kept = ids[0],
                removed = ?removed,
                "removed duplicate records"
            );
            self.audit.record(
                AuditEvent::new(self.run_id, AuditAction::DuplicatesRemoved, entity)
                    .with_kind(record.kind)
                    .with_ids(removed.clone())
                    .with_detail(serde_json::json!({ "kept": ids[0] })),
            );
        }

        let id = ids[0];
        let current = rows.into_iter().next().unwrap_or_default();
        let changes: Values = record
            .values
            .iter()
            .filter(|(field, wanted)| current.get(*field).unwrap_or(&FieldValue::Null) != *wanted)
            .map(|(field, wanted)| (field.clone(), wanted.clone()))
            .collect();

        if changes.is_empty() {
            return Ok(RecordOutcome::Unchanged { id, removed });
        }

        self.store.write(record.kind, id, &changes).await?;
        let changed: Vec<&String> = changes.keys().collect();
        tracing::debug!(model = %record.kind, name = %record.name, id, fields = ?changed, "updated");
        self.audit.record(
            AuditEvent::new(self.run_id, AuditAction::Updated, entity)
                .with_kind(record.kind)
                .with_ids([id])
                .with_detail(serde_json::json!({ "fields": changed })),
        );
        Ok(RecordOutcome::Updated { id, removed })
    }
}

fn store_failure(outcome: &mut EntityOutcome, err: impl Into<ReconcileError>) {
    let err = err.into();
    tracing::error!(entity_type = %outcome.entity, error = %err, "store operation failed");
    outcome.failures.push(Failure {
        entity: outcome.entity.clone(),
        kind: FailureKind::Store,
        message: format!("{:#}", err),
    });
}

/// Relation sets compare as sets.
fn normalized(values: Values) -> Values {
    values
        .into_iter()
        .map(|(field, value)| match value {
            FieldValue::Refs(ids) => (field, FieldValue::refs(ids)),
            other => (field, other),
        })
        .collect()
}

/// Fields whose values are not the same on every row.
fn differing_fields(rows: &[Values], fields: &[&str]) -> Vec<String> {
    let mut differing = BTreeSet::new();
    if let Some((first, rest)) = rows.split_first() {
        for field in fields {
            let expected = first.get(*field);
            if rest.iter().any(|row| row.get(*field) != expected) {
                differing.insert(field.to_string());
            }
        }
    }
    differing.into_iter().collect()
}
