//! Per-record and per-run reconciliation results.

use serde::Serialize;
use std::fmt;
use tenantry_core::{RecordId, SecurityClass};
use thiserror::Error;

use crate::external_id::IdentifierCollision;
use crate::store::{Criterion, RecordKind};

/// Several records match one logical key and disagree on content.
///
/// Nothing is mutated; the records are left for manual remediation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error(
    "{count} conflicting {model} records match [{}]; differing fields {fields:?}; ids {ids:?}",
    join_criteria(.criteria)
)]
pub struct ConflictError {
    pub model: RecordKind,
    pub count: usize,
    pub criteria: Vec<Criterion>,
    /// Fields whose values differ between the matches.
    pub fields: Vec<String>,
    pub ids: Vec<RecordId>,
}

fn join_criteria(criteria: &[Criterion]) -> String {
    criteria
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// What happened to one desired record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Created { id: RecordId },
    /// Fields were written. `removed` lists exact duplicates that were unlinked.
    Updated { id: RecordId, removed: Vec<RecordId> },
    Unchanged { id: RecordId, removed: Vec<RecordId> },
    Conflict(ConflictError),
}

impl RecordOutcome {
    /// The surviving record, if any.
    pub fn id(&self) -> Option<RecordId> {
        match self {
            RecordOutcome::Created { id }
            | RecordOutcome::Updated { id, .. }
            | RecordOutcome::Unchanged { id, .. } => Some(*id),
            RecordOutcome::Conflict(_) => None,
        }
    }

    pub fn removed(&self) -> &[RecordId] {
        match self {
            RecordOutcome::Updated { removed, .. } | RecordOutcome::Unchanged { removed, .. } => {
                removed
            }
            _ => &[],
        }
    }
}

/// A reconciled record and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordReport {
    pub kind: RecordKind,
    pub name: String,
    pub outcome: RecordOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A rule predicate did not compile; no global rules were written.
    Compile,
    /// The store rejected an operation; the entity was abandoned.
    Store,
}

/// An entity whose reconciliation did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub entity: String,
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}): {}", self.entity, self.kind, self.message)
    }
}

/// Result of reconciling one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityOutcome {
    pub entity: String,
    pub class: SecurityClass,
    pub records: Vec<RecordReport>,
    pub failures: Vec<Failure>,
    pub collisions: Vec<IdentifierCollision>,
}

impl EntityOutcome {
    pub fn new(entity: &str, class: SecurityClass) -> Self {
        Self {
            entity: entity.to_string(),
            class,
            records: Vec::new(),
            failures: Vec::new(),
            collisions: Vec::new(),
        }
    }
}

/// Totals over a full run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub entities: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub duplicates_removed: usize,
    pub conflicts: Vec<ConflictError>,
    pub failures: Vec<Failure>,
    pub identifier_collisions: Vec<IdentifierCollision>,
    /// Resolved privileged group, if any.
    pub manager_group: Option<RecordId>,
    pub entity_outcomes: Vec<EntityOutcome>,
}

impl ReconcileSummary {
    /// Fold one entity's outcome into the totals.
    pub fn absorb(&mut self, outcome: EntityOutcome) {
        self.entities += 1;
        for report in &outcome.records {
            self.duplicates_removed += report.outcome.removed().len();
            match &report.outcome {
                RecordOutcome::Created { .. } => self.created += 1,
                RecordOutcome::Updated { .. } => self.updated += 1,
                RecordOutcome::Unchanged { .. } => self.unchanged += 1,
                RecordOutcome::Conflict(c) => self.conflicts.push(c.clone()),
            }
        }
        self.failures.extend(outcome.failures.iter().cloned());
        self.identifier_collisions
            .extend(outcome.collisions.iter().cloned());
        self.entity_outcomes.push(outcome);
    }

    /// Number of records created, updated or unlinked.
    pub fn mutations(&self) -> usize {
        self.created + self.updated + self.duplicates_removed
    }

    pub fn has_problems(&self) -> bool {
        !self.conflicts.is_empty() || !self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FieldValue;

    fn report(outcome: RecordOutcome) -> RecordReport {
        RecordReport {
            kind: RecordKind::Rule,
            name: "x".into(),
            outcome,
        }
    }

    #[test]
    fn test_summary_counts() {
        let conflict = ConflictError {
            model: RecordKind::Rule,
            count: 2,
            criteria: vec![Criterion::eq("name", FieldValue::text("x"))],
            fields: vec!["domain_force".into()],
            ids: vec![4, 5],
        };
        let mut outcome = EntityOutcome::new("sale.order", SecurityClass::TenantScoped);
        outcome.records = vec![
            report(RecordOutcome::Created { id: 1 }),
            report(RecordOutcome::Updated { id: 2, removed: vec![8, 9] }),
            report(RecordOutcome::Unchanged { id: 3, removed: vec![] }),
            report(RecordOutcome::Conflict(conflict.clone())),
        ];

        let mut summary = ReconcileSummary::default();
        summary.absorb(outcome);

        assert_eq!(summary.entities, 1);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.duplicates_removed, 2);
        assert_eq!(summary.mutations(), 4);
        assert_eq!(summary.conflicts, vec![conflict]);
        assert!(summary.has_problems());
    }

    #[test]
    fn test_every_failure_is_kept() {
        let mut outcome = EntityOutcome::new("sale.order", SecurityClass::TenantScoped);
        outcome.failures.push(Failure {
            entity: "sale.order".into(),
            kind: FailureKind::Compile,
            message: "unknown placeholder".into(),
        });
        outcome.failures.push(Failure {
            entity: "sale.order".into(),
            kind: FailureKind::Store,
            message: "connection reset".into(),
        });

        let mut summary = ReconcileSummary::default();
        summary.absorb(outcome);

        let kinds: Vec<FailureKind> = summary.failures.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![FailureKind::Compile, FailureKind::Store]);
        assert_eq!(summary.entity_outcomes[0].failures.len(), 2);
    }

    #[test]
    fn test_conflict_message() {
        let conflict = ConflictError {
            model: RecordKind::AccessGrant,
            count: 2,
            criteria: vec![Criterion::eq("group_id", FieldValue::Ref(3))],
            fields: vec!["perm_unlink".into()],
            ids: vec![10, 11],
        };
        assert_eq!(
            conflict.to_string(),
            "2 conflicting ir.model.access records match [('group_id', '=', 3)]; differing fields [\"perm_unlink\"]; ids [10, 11]"
        );
    }
}
