//! Reconciliation against the in-memory store.

use pretty_assertions::assert_eq;
use std::io;
use std::sync::{Arc, Mutex};
use tenantry_core::{EntityType, SecurityClass, TenantryConfig};
use tenantry_policy::Classifier;
use tenantry_runtime::{
    AuditAction, ExternalRef, FailureKind, FieldValue, InMemoryStore, MemoryAuditSink,
    Orchestrator, RecordKind, RecordOutcome, RecordStore, Values,
};

const MODULE: &str = "multicompany_instead_of_multidatabase";
const GROUP: &str = "group_company_manager";
const SALE_ORDER_RULE: &str = "sale.order - company_model, read_and_edit_if";

struct Fixture {
    orchestrator: Orchestrator<InMemoryStore, Arc<MemoryAuditSink>>,
    audit: Arc<MemoryAuditSink>,
    sale_order: EntityType,
    rule_entity: EntityType,
    group: i64,
}

fn fixture_with(config: TenantryConfig, with_group: bool) -> Fixture {
    let store = InMemoryStore::new();
    let group = if with_group { store.add_group(MODULE, GROUP) } else { 0 };
    store.add_entity_type("res.company");
    store.add_entity_type("res.partner");
    let sale_order = store.add_entity_type("sale.order");
    let rule_entity = store.add_entity_type("ir.rule");
    store.add_entity_type("ir.config_parameter");

    let audit = Arc::new(MemoryAuditSink::new());
    Fixture {
        orchestrator: Orchestrator::new(store, audit.clone(), config),
        audit,
        sale_order,
        rule_entity,
        group,
    }
}

fn fixture() -> Fixture {
    fixture_with(TenantryConfig::default(), true)
}

fn store(f: &Fixture) -> &InMemoryStore {
    f.orchestrator.store()
}

fn values(pairs: &[(&str, FieldValue)]) -> Values {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Formatted log output, shared with the subscriber's writer.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .without_time()
        .with_max_level(tracing::Level::WARN)
        .finish();
    (buffer, tracing::subscriber::set_default(subscriber))
}

fn stale_rule(entity: &EntityType) -> Values {
    let mut stale = values(&[
        ("name", FieldValue::text(SALE_ORDER_RULE)),
        ("model_id", FieldValue::Ref(entity.id)),
        ("domain_force", FieldValue::text("[('company_id','=',1)]")),
        ("groups", FieldValue::refs([])),
    ]);
    for perm in ["perm_read", "perm_write", "perm_create", "perm_unlink"] {
        stale.insert(perm.to_string(), FieldValue::Bool(true));
    }
    stale
}

#[tokio::test]
async fn test_first_run_creates_every_record() {
    let f = fixture();
    let report = f.orchestrator.secure().await;

    assert!(report.is_clean(), "{:?}", report.errors);
    let summary = report.reconcile.unwrap();
    // 4 entity types: 2 + 2 + 1 + 1 global rules, plus 2 manager records each.
    assert_eq!(summary.entities, 4);
    assert_eq!(summary.created, 14);
    assert_eq!(summary.manager_group, Some(f.group));
    assert_eq!(store(&f).records(RecordKind::AccessGrant).len(), 4);
    assert_eq!(store(&f).records(RecordKind::Rule).len(), 10);
    assert_eq!(f.audit.count(AuditAction::Created), 14);
}

#[tokio::test]
async fn test_second_run_writes_nothing() {
    let f = fixture();
    f.orchestrator.secure().await;
    store(&f).reset_counts();

    let report = f.orchestrator.secure().await;
    let summary = report.reconcile.unwrap();

    assert_eq!(store(&f).mutation_counts().total(), 0);
    assert_eq!(summary.mutations(), 0);
    assert_eq!(summary.unchanged, 14);
}

#[tokio::test]
async fn test_rule_entity_is_excluded() {
    let f = fixture();
    f.orchestrator.secure().await;

    let on_rule_entity = FieldValue::Ref(f.rule_entity.id);
    for kind in [RecordKind::Rule, RecordKind::AccessGrant] {
        assert!(store(&f)
            .records(kind)
            .iter()
            .all(|(_, v)| v.get("model_id") != Some(&on_rule_entity)));
    }
}

#[tokio::test]
async fn test_global_rule_content() {
    let f = fixture();
    f.orchestrator.secure().await;

    let rules = store(&f).records_named(RecordKind::Rule, SALE_ORDER_RULE);
    assert_eq!(rules.len(), 1);
    let rule = &rules[0].1;
    assert_eq!(rule["model_id"], FieldValue::Ref(f.sale_order.id));
    assert_eq!(rule["groups"], FieldValue::Refs(vec![]));
    assert_eq!(
        rule["domain_force"],
        FieldValue::text(
            "['&', ('company_id','in',company_ids), '|', ('company_id','=',company_id), '|', ('company_id','parent_of',company_id), ('company_id','child_of',company_id)]"
        )
    );
    for perm in ["perm_read", "perm_write", "perm_create", "perm_unlink"] {
        assert_eq!(rule[perm], FieldValue::Bool(true));
    }

    let manager = store(&f).records_named(RecordKind::Rule, "sale.order - company manager");
    assert_eq!(manager.len(), 1);
    assert_eq!(manager[0].1["groups"], FieldValue::Refs(vec![f.group]));
    assert_eq!(manager[0].1["domain_force"], FieldValue::text("[(1, '=', 1)]"));
}

#[tokio::test]
async fn test_drifted_record_is_updated_once() {
    let f = fixture();
    f.orchestrator.secure().await;

    let (id, _) = store(&f).records_named(RecordKind::Rule, SALE_ORDER_RULE)[0].clone();
    store(&f)
        .write(
            RecordKind::Rule,
            id,
            &values(&[
                ("perm_unlink", FieldValue::Bool(false)),
                ("domain_force", FieldValue::text("[]")),
            ]),
        )
        .await
        .unwrap();
    store(&f).reset_counts();

    let summary = f.orchestrator.secure().await.reconcile.unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(store(&f).mutation_counts().writes, 1);
    assert_eq!(
        store(&f).records_named(RecordKind::Rule, SALE_ORDER_RULE)[0].1["perm_unlink"],
        FieldValue::Bool(true)
    );
}

#[tokio::test]
async fn test_identical_duplicates_are_collapsed() {
    let f = fixture();
    f.orchestrator.secure().await;

    let (kept, original) = store(&f).records_named(RecordKind::Rule, SALE_ORDER_RULE)[0].clone();
    store(&f).insert_record(RecordKind::Rule, original.clone());
    store(&f).insert_record(RecordKind::Rule, original);

    let summary = f.orchestrator.secure().await.reconcile.unwrap();
    let remaining = store(&f).records_named(RecordKind::Rule, SALE_ORDER_RULE);

    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].0, kept);
    assert_eq!(summary.duplicates_removed, 2);
    assert!(summary.conflicts.is_empty());
    assert_eq!(f.audit.count(AuditAction::DuplicatesRemoved), 1);
}

#[tokio::test]
async fn test_stale_identical_duplicates_are_collapsed_then_converged() {
    let f = fixture();
    let stale = stale_rule(&f.sale_order);
    store(&f).insert_record(RecordKind::Rule, stale.clone());
    store(&f).insert_record(RecordKind::Rule, stale);

    let report = f.orchestrator.secure().await;
    let outcome = report
        .reconcile
        .unwrap()
        .entity_outcomes
        .into_iter()
        .find(|o| o.entity == "sale.order")
        .unwrap();
    let global = outcome
        .records
        .iter()
        .find(|r| r.name == SALE_ORDER_RULE && r.kind == RecordKind::Rule)
        .unwrap();

    assert!(matches!(&global.outcome, RecordOutcome::Updated { removed, .. } if removed.len() == 1));
    let remaining = store(&f).records_named(RecordKind::Rule, SALE_ORDER_RULE);
    assert_eq!(remaining.len(), 1);
    assert!(matches!(&remaining[0].1["domain_force"], FieldValue::Text(d) if d.starts_with("['&'")));
}

#[tokio::test]
async fn test_conflicting_duplicates_are_left_alone() {
    let f = fixture();
    let base = values(&[
        ("name", FieldValue::text(SALE_ORDER_RULE)),
        ("model_id", FieldValue::Ref(f.sale_order.id)),
        ("groups", FieldValue::refs([])),
        ("perm_read", FieldValue::Bool(true)),
    ]);
    let mut first = base.clone();
    first.insert("domain_force".into(), FieldValue::text("[('company_id','=',1)]"));
    let mut second = base;
    second.insert("domain_force".into(), FieldValue::text("[('company_id','=',2)]"));
    let a = store(&f).insert_record(RecordKind::Rule, first.clone());
    let b = store(&f).insert_record(RecordKind::Rule, second.clone());

    let (logs, _guard) = capture_logs();
    let summary = f.orchestrator.secure().await.reconcile.unwrap();

    let critical: Vec<String> = logs
        .lines()
        .into_iter()
        .filter(|line| line.contains("severity=\"critical\""))
        .collect();
    assert_eq!(critical.len(), 1, "{:#?}", logs.lines());
    assert!(critical[0].contains("ERROR"));
    assert!(critical[0].contains("manual remediation required"));
    assert!(critical[0].contains("domain_force"));

    assert_eq!(summary.conflicts.len(), 1);
    let conflict = &summary.conflicts[0];
    assert_eq!(conflict.model, RecordKind::Rule);
    assert_eq!(conflict.count, 2);
    assert_eq!(conflict.ids, vec![a, b]);
    assert_eq!(conflict.fields, vec!["domain_force".to_string()]);
    assert_eq!(f.audit.count(AuditAction::ConflictDetected), 1);

    let remaining = store(&f).records_named(RecordKind::Rule, SALE_ORDER_RULE);
    assert_eq!(remaining, vec![(a, first), (b, second)]);
    // The rest of the catalog still converged.
    assert_eq!(summary.created, 13);
    assert_eq!(store(&f).mutation_counts().unlinks, 0);
}

#[tokio::test]
async fn test_missing_manager_group_skips_manager_records() {
    let f = fixture_with(TenantryConfig::default(), false);
    let report = f.orchestrator.secure().await;

    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains(GROUP));
    let summary = report.reconcile.unwrap();
    assert_eq!(summary.manager_group, None);
    assert_eq!(summary.created, 6);
    assert!(store(&f).records(RecordKind::AccessGrant).is_empty());
}

#[tokio::test]
async fn test_backfill_fills_only_nulls() {
    let f = fixture();
    store(&f).add_table("sale_order", "company_id", vec![None, Some(3), None]);
    store(&f).add_table("res_partner", "company_id", vec![Some(2)]);
    store(&f).add_table("res_lang", "active_id", vec![None]);

    let report = f.orchestrator.secure().await;
    let backfill = report.backfill.unwrap();

    assert_eq!(backfill.rows(), 2);
    assert_eq!(
        store(&f).table("sale_order", "company_id"),
        Some(vec![Some(1), Some(3), Some(1)])
    );
    assert_eq!(store(&f).table("res_partner", "company_id"), Some(vec![Some(2)]));
    assert_eq!(store(&f).table("res_lang", "active_id"), Some(vec![None]));
    assert_eq!(f.audit.count(AuditAction::Backfilled), 1);
}

#[tokio::test]
async fn test_backfill_disabled() {
    let mut config = TenantryConfig::default();
    config.backfill.enabled = false;
    let f = fixture_with(config, true);
    store(&f).add_table("sale_order", "company_id", vec![None]);

    let report = f.orchestrator.secure().await;

    assert!(report.backfill.is_none());
    assert_eq!(store(&f).table("sale_order", "company_id"), Some(vec![None]));
}

#[tokio::test]
async fn test_external_ids_register_and_warn_on_collision() {
    let mut config = TenantryConfig::default();
    config.external_ids.enabled = true;
    let module = config.external_ids.module.clone();
    let f = fixture_with(config, true);
    let elsewhere = ExternalRef {
        entity: "res.partner".into(),
        res_id: 999,
    };
    store(&f).insert_external_id(&module, "sale_order_global_read_and_edit_rule", elsewhere.clone());

    let summary = f.orchestrator.secure().await.reconcile.unwrap();

    assert_eq!(summary.identifier_collisions.len(), 1);
    assert_eq!(summary.identifier_collisions[0].existing, elsewhere);
    assert_eq!(
        store(&f).external_id(&module, "sale_order_global_read_and_edit_rule"),
        Some(elsewhere)
    );

    let (grant_id, _) =
        store(&f).records_named(RecordKind::AccessGrant, "sale.order - company manager")[0].clone();
    assert_eq!(
        store(&f).external_id(&module, "sale_order_company_manager_access"),
        Some(ExternalRef {
            entity: "ir.model.access".into(),
            res_id: grant_id,
        })
    );
    assert!(store(&f)
        .external_id(&module, "res_company_global_read_rule")
        .is_some());
    assert_eq!(f.audit.count(AuditAction::ExternalIdRegistered), 13);
    assert_eq!(f.audit.count(AuditAction::ExternalIdCollision), 1);

    // Existing bindings are left as they are on the next run.
    f.orchestrator.secure().await;
    assert_eq!(f.audit.count(AuditAction::ExternalIdRegistered), 13);
}

#[tokio::test]
async fn test_custom_classifier() {
    let orchestrator = Orchestrator::new(
        InMemoryStore::new(),
        MemoryAuditSink::new(),
        TenantryConfig::default(),
    )
    .with_classifier(Classifier::new().with_members(SecurityClass::NoAccess, ["sale.order"]));
    orchestrator.store().add_entity_type("sale.order");

    let summary = orchestrator.secure().await.reconcile.unwrap();

    assert_eq!(summary.entity_outcomes[0].class, SecurityClass::NoAccess);
    assert_eq!(
        orchestrator
            .store()
            .records_named(RecordKind::Rule, "sale.order - no_access_model, read_and_edit_if")
            .len(),
        1
    );
}

#[tokio::test]
async fn test_archived_copy_is_not_treated_as_duplicate() {
    let f = fixture();
    let mut archived = stale_rule(&f.sale_order);
    archived.insert("active".into(), FieldValue::Bool(false));
    let archived_id = store(&f).insert_record(RecordKind::Rule, archived.clone());

    let summary = f.orchestrator.secure().await.reconcile.unwrap();

    assert_eq!(summary.created, 14);
    assert_eq!(summary.duplicates_removed, 0);
    assert_eq!(store(&f).mutation_counts().unlinks, 0);

    let rules = store(&f).records_named(RecordKind::Rule, SALE_ORDER_RULE);
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0], (archived_id, archived));
    let active = &rules[1].1;
    assert_eq!(active.get("active"), None);
    assert!(matches!(&active["domain_force"], FieldValue::Text(d) if d.starts_with("['&'")));
}

#[tokio::test]
async fn test_store_failure_rolls_back_only_that_entity() {
    let f = fixture();
    store(&f).fail_writes(RecordKind::AccessGrant, f.sale_order.id);
    store(&f).add_table("sale_order", "company_id", vec![None, Some(3)]);

    let report = f.orchestrator.secure().await;
    let summary = report.reconcile.as_ref().unwrap();

    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].entity, "sale.order");
    assert_eq!(summary.failures[0].kind, FailureKind::Store);
    assert!(!report.is_clean());

    // The global rule created before the failing grant was rolled back.
    let sale_order = summary
        .entity_outcomes
        .iter()
        .find(|o| o.entity == "sale.order")
        .unwrap();
    assert!(sale_order.records.is_empty());
    let model = FieldValue::Ref(f.sale_order.id);
    assert!(store(&f)
        .records(RecordKind::Rule)
        .iter()
        .all(|(_, v)| v.get("model_id") != Some(&model)));

    // Every other entity type converged and the backfill still ran.
    for outcome in summary.entity_outcomes.iter().filter(|o| o.entity != "sale.order") {
        assert!(outcome.failures.is_empty(), "{}", outcome.entity);
        assert!(!outcome.records.is_empty(), "{}", outcome.entity);
    }
    let persisted =
        store(&f).records(RecordKind::Rule).len() + store(&f).records(RecordKind::AccessGrant).len();
    assert_eq!(summary.created, persisted);
    assert_eq!(store(&f).records(RecordKind::AccessGrant).len(), 3);
    assert_eq!(
        store(&f).table("sale_order", "company_id"),
        Some(vec![Some(1), Some(3)])
    );
}

#[tokio::test]
async fn test_failed_backfill_table_is_rolled_back_alone() {
    let f = fixture();
    store(&f).add_table("account_move", "company_id", vec![None]);
    store(&f).add_table("sale_order", "company_id", vec![None]);
    store(&f).fail_table("account_move");

    let report = f.orchestrator.secure().await;
    let backfill = report.backfill.as_ref().unwrap();

    assert_eq!(backfill.failed.len(), 1);
    assert_eq!(backfill.failed[0].table, "account_move");
    assert_eq!(backfill.rows(), 1);
    assert_eq!(store(&f).table("account_move", "company_id"), Some(vec![None]));
    assert_eq!(store(&f).table("sale_order", "company_id"), Some(vec![Some(1)]));
    assert!(report.errors.iter().any(|e| e.contains("account_move")));
}

#[tokio::test]
async fn test_dedup_drops_bindings_of_removed_records() {
    let mut config = TenantryConfig::default();
    config.external_ids.enabled = true;
    let module = config.external_ids.module.clone();
    let f = fixture_with(config, true);
    f.orchestrator.secure().await;

    let (kept, current) = store(&f).records_named(RecordKind::Rule, SALE_ORDER_RULE)[0].clone();
    let copy = store(&f).insert_record(RecordKind::Rule, current);
    store(&f).insert_external_id(
        &module,
        "sale_order_global_read_and_edit_rule",
        ExternalRef {
            entity: "ir.rule".into(),
            res_id: copy,
        },
    );

    let summary = f.orchestrator.secure().await.reconcile.unwrap();

    assert_eq!(summary.duplicates_removed, 1);
    assert!(summary.identifier_collisions.is_empty(), "{:?}", summary.identifier_collisions);
    assert_eq!(
        store(&f).external_id(&module, "sale_order_global_read_and_edit_rule"),
        Some(ExternalRef {
            entity: "ir.rule".into(),
            res_id: kept,
        })
    );
}
