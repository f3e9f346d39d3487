//! # tenantry-runtime
//!
//! Converges the host store's generated access rules to the rule catalog.
//!
//! For every entity type except the rule entity itself, the [`Reconciler`]
//! derives the desired records (global tenant rules, a model-level access
//! grant and a permissive rule for the privileged group), finds existing
//! records by logical key, and creates, updates or deduplicates them.
//! Duplicates that disagree are never touched; they are reported as
//! conflicts for manual remediation.
//!
//! The [`Orchestrator`] runs reconciliation followed by the tenant reference
//! backfill and never fails: everything that goes wrong ends up in its
//! [`BootstrapReport`].

pub mod audit;
pub mod backfill;
pub mod desired;
pub mod error;
pub mod external_id;
pub mod memory;
pub mod orchestrator;
pub mod outcome;
pub mod reconcile;
pub mod store;

pub use audit::{AuditAction, AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use backfill::{backfill_tenant_references, BackfillReport, TableBackfill, TableFailure};
pub use desired::{global_rules, manager_records, DesiredRecord, PERMISSIVE_DOMAIN};
pub use error::ReconcileError;
pub use external_id::{register_external_id, IdentifierCollision, Registration};
pub use memory::{InMemoryStore, MutationCounts};
pub use orchestrator::{BootstrapReport, Orchestrator};
pub use outcome::{
    ConflictError, EntityOutcome, Failure, FailureKind, ReconcileSummary, RecordOutcome,
    RecordReport,
};
pub use reconcile::Reconciler;
pub use store::{
    Criterion, ExternalRef, FieldValue, RecordKind, RecordStore, Savepoints, SchemaChannel, Values,
};
