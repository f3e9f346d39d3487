//! Audit trail of mutations made to the host store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tenantry_core::RecordId;
use uuid::Uuid;

use crate::store::RecordKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    DuplicatesRemoved,
    ConflictDetected,
    ExternalIdRegistered,
    ExternalIdCollision,
    Backfilled,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Updated => write!(f, "UPDATED"),
            Self::DuplicatesRemoved => write!(f, "DUPLICATES_REMOVED"),
            Self::ConflictDetected => write!(f, "CONFLICT"),
            Self::ExternalIdRegistered => write!(f, "XMLID_REGISTERED"),
            Self::ExternalIdCollision => write!(f, "XMLID_COLLISION"),
            Self::Backfilled => write!(f, "BACKFILLED"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub run_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub action: AuditAction,
    /// Entity type the generated records belong to, or the backfilled table.
    pub subject: String,
    pub kind: Option<RecordKind>,
    pub ids: Vec<RecordId>,
    pub detail: serde_json::Value,
}

impl AuditEvent {
    pub fn new(run_id: Uuid, action: AuditAction, subject: impl Into<String>) -> Self {
        Self {
            run_id,
            occurred_at: Utc::now(),
            action,
            subject: subject.into(),
            kind: None,
            ids: Vec::new(),
            detail: serde_json::Value::Null,
        }
    }

    pub fn with_kind(mut self, kind: RecordKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_ids(mut self, ids: impl Into<Vec<RecordId>>) -> Self {
        self.ids = ids.into();
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Receives one event per store mutation or detected problem.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits events as structured log lines on the `tenantry::audit` target.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "tenantry::audit",
            run_id = %event.run_id,
            action = %event.action,
            subject = %event.subject,
            kind = ?event.kind,
            ids = ?event.ids,
            detail = %event.detail,
            "audit"
        );
    }
}

/// Keeps events in memory, for dry runs and tests.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, action: AuditAction) -> usize {
        self.events().iter().filter(|e| e.action == action).count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl<T: AuditSink + ?Sized> AuditSink for std::sync::Arc<T> {
    fn record(&self, event: AuditEvent) {
        (**self).record(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_collects_events() {
        let sink = MemoryAuditSink::new();
        let run = Uuid::new_v4();
        sink.record(AuditEvent::new(run, AuditAction::Created, "sale.order").with_ids([1]));
        sink.record(
            AuditEvent::new(run, AuditAction::Backfilled, "sale_order")
                .with_detail(serde_json::json!({ "rows": 3 })),
        );

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.count(AuditAction::Created), 1);
        assert_eq!(sink.events()[0].ids, vec![1]);
    }
}
