//! In-memory record store.
//!
//! Backs dry runs and the reconciliation tests. Mutations are counted so a
//! second run can be asserted to write nothing. Savepoints snapshot the data,
//! and writes can be made to fail on purpose to exercise rollback.

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use tenantry_core::{EntityType, RecordId};

use crate::store::{
    Criterion, ExternalRef, FieldValue, RecordKind, RecordStore, Savepoints, SchemaChannel,
    Values,
};

/// Mutating calls received since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MutationCounts {
    pub creates: usize,
    pub writes: usize,
    pub unlinks: usize,
}

impl MutationCounts {
    pub fn total(&self) -> usize {
        self.creates + self.writes + self.unlinks
    }
}

/// Everything a savepoint restores. Ids are never reused after a rollback.
#[derive(Clone, Default)]
struct Data {
    records: BTreeMap<RecordKind, BTreeMap<RecordId, Values>>,
    external_ids: BTreeMap<(String, String), ExternalRef>,
    /// table -> column -> one value per row
    tables: BTreeMap<String, BTreeMap<String, Vec<Option<i64>>>>,
}

#[derive(Default)]
struct State {
    next_id: RecordId,
    entity_types: Vec<EntityType>,
    groups: BTreeMap<(String, String), RecordId>,
    data: Data,
    savepoints: Vec<(String, Data)>,
    failing_models: BTreeSet<(RecordKind, RecordId)>,
    failing_tables: BTreeSet<String>,
    counts: MutationCounts,
}

impl State {
    fn allocate(&mut self) -> RecordId {
        self.next_id += 1;
        self.next_id
    }

    fn savepoint_index(&self, name: &str) -> anyhow::Result<usize> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| anyhow!("savepoint {} does not exist", name))
    }

    fn reject_model(&self, kind: RecordKind, values: &Values) -> anyhow::Result<()> {
        match values.get("model_id") {
            Some(FieldValue::Ref(model)) if self.failing_models.contains(&(kind, *model)) => {
                bail!("{} write rejected for model {}", kind, model)
            }
            _ => Ok(()),
        }
    }
}

/// Archived records are invisible to search.
fn is_active(values: &Values) -> bool {
    values.get("active") != Some(&FieldValue::Bool(false))
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_entity_type(&self, name: &str) -> EntityType {
        let mut state = self.state();
        let entity = EntityType::new(state.allocate(), name);
        state.entity_types.push(entity.clone());
        entity
    }

    pub fn add_group(&self, module: &str, name: &str) -> RecordId {
        let mut state = self.state();
        let id = state.allocate();
        state
            .groups
            .insert((module.to_string(), name.to_string()), id);
        id
    }

    /// Insert a record directly, without counting it as a mutation.
    pub fn insert_record(&self, kind: RecordKind, values: Values) -> RecordId {
        let mut state = self.state();
        let id = state.allocate();
        state.data.records.entry(kind).or_default().insert(id, values);
        id
    }

    pub fn add_table(&self, table: &str, column: &str, rows: Vec<Option<i64>>) {
        self.state()
            .data
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string(), rows);
    }

    /// Bind an external identifier directly.
    pub fn insert_external_id(&self, module: &str, name: &str, target: ExternalRef) {
        self.state()
            .data
            .external_ids
            .insert((module.to_string(), name.to_string()), target);
    }

    pub fn records(&self, kind: RecordKind) -> Vec<(RecordId, Values)> {
        self.state()
            .data
            .records
            .get(&kind)
            .map(|records| records.iter().map(|(id, v)| (*id, v.clone())).collect())
            .unwrap_or_default()
    }

    /// Records of `kind` whose `name` field equals `name`.
    pub fn records_named(&self, kind: RecordKind, name: &str) -> Vec<(RecordId, Values)> {
        let wanted = FieldValue::text(name);
        self.records(kind)
            .into_iter()
            .filter(|(_, values)| values.get("name") == Some(&wanted))
            .collect()
    }

    pub fn table(&self, table: &str, column: &str) -> Option<Vec<Option<i64>>> {
        self.state()
            .data
            .tables
            .get(table)
            .and_then(|columns| columns.get(column))
            .cloned()
    }

    pub fn external_id(&self, module: &str, name: &str) -> Option<ExternalRef> {
        self.state()
            .data
            .external_ids
            .get(&(module.to_string(), name.to_string()))
            .cloned()
    }

    pub fn mutation_counts(&self) -> MutationCounts {
        self.state().counts
    }

    /// Make every create or write of a `kind` record for entity type
    /// `model_id` fail.
    pub fn fail_writes(&self, kind: RecordKind, model_id: RecordId) {
        self.state().failing_models.insert((kind, model_id));
    }

    /// Make the backfill of `table` fail.
    pub fn fail_table(&self, table: &str) {
        self.state().failing_tables.insert(table.to_string());
    }

    /// Forget the mutation counters, keeping the data.
    pub fn reset_counts(&self) {
        self.state().counts = MutationCounts::default();
    }
}

fn normalize(values: &Values) -> Values {
    values
        .iter()
        .map(|(field, value)| match value {
            FieldValue::Refs(ids) => (field.clone(), FieldValue::refs(ids.iter().copied())),
            other => (field.clone(), other.clone()),
        })
        .collect()
}

#[async_trait]
impl Savepoints for InMemoryStore {
    async fn savepoint(&self, name: &str) -> anyhow::Result<()> {
        let mut state = self.state();
        let snapshot = state.data.clone();
        state.savepoints.push((name.to_string(), snapshot));
        Ok(())
    }

    async fn release_savepoint(&self, name: &str) -> anyhow::Result<()> {
        let mut state = self.state();
        let index = state.savepoint_index(name)?;
        state.savepoints.truncate(index);
        Ok(())
    }

    async fn rollback_to_savepoint(&self, name: &str) -> anyhow::Result<()> {
        let mut state = self.state();
        let index = state.savepoint_index(name)?;
        let mut discarded = state.savepoints.split_off(index);
        let (_, snapshot) = discarded.swap_remove(0);
        state.data = snapshot;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn entity_types(&self) -> anyhow::Result<Vec<EntityType>> {
        Ok(self.state().entity_types.clone())
    }

    async fn resolve_group(&self, module: &str, name: &str) -> anyhow::Result<Option<RecordId>> {
        Ok(self
            .state()
            .groups
            .get(&(module.to_string(), name.to_string()))
            .copied())
    }

    async fn search(
        &self,
        kind: RecordKind,
        criteria: &[Criterion],
    ) -> anyhow::Result<Vec<RecordId>> {
        let state = self.state();
        let Some(records) = state.data.records.get(&kind) else {
            return Ok(Vec::new());
        };
        Ok(records
            .iter()
            .filter(|(_, values)| is_active(values))
            .filter(|(_, values)| criteria.iter().all(|c| c.matches(values)))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn read(
        &self,
        kind: RecordKind,
        ids: &[RecordId],
        fields: &[&str],
    ) -> anyhow::Result<Vec<Values>> {
        let state = self.state();
        ids.iter()
            .map(|id| -> anyhow::Result<Values> {
                let values = state
                    .data
                    .records
                    .get(&kind)
                    .and_then(|records| records.get(id))
                    .ok_or_else(|| anyhow!("{} record {} does not exist", kind, id))?;
                Ok(fields
                    .iter()
                    .filter_map(|f| values.get(*f).map(|v| (f.to_string(), v.clone())))
                    .collect())
            })
            .collect()
    }

    async fn create(&self, kind: RecordKind, values: &Values) -> anyhow::Result<RecordId> {
        let mut state = self.state();
        state.reject_model(kind, values)?;
        let id = state.allocate();
        state
            .data
            .records
            .entry(kind)
            .or_default()
            .insert(id, normalize(values));
        state.counts.creates += 1;
        Ok(id)
    }

    async fn write(&self, kind: RecordKind, id: RecordId, values: &Values) -> anyhow::Result<()> {
        let mut state = self.state();
        let current = state
            .data
            .records
            .get(&kind)
            .and_then(|records| records.get(&id))
            .ok_or_else(|| anyhow!("{} record {} does not exist", kind, id))?;
        state.reject_model(kind, current)?;
        if let Some(record) = state
            .data
            .records
            .get_mut(&kind)
            .and_then(|records| records.get_mut(&id))
        {
            record.extend(normalize(values));
        }
        state.counts.writes += 1;
        Ok(())
    }

    async fn unlink(&self, kind: RecordKind, ids: &[RecordId]) -> anyhow::Result<()> {
        let mut state = self.state();
        if let Some(records) = state.data.records.get_mut(&kind) {
            for id in ids {
                records.remove(id);
            }
        }
        state
            .data
            .external_ids
            .retain(|_, target| target.entity != kind.entity() || !ids.contains(&target.res_id));
        state.counts.unlinks += 1;
        Ok(())
    }

    async fn find_external_id(
        &self,
        module: &str,
        name: &str,
    ) -> anyhow::Result<Option<ExternalRef>> {
        Ok(self.external_id(module, name))
    }

    async fn create_external_id(
        &self,
        module: &str,
        name: &str,
        target: &ExternalRef,
    ) -> anyhow::Result<()> {
        let mut state = self.state();
        let key = (module.to_string(), name.to_string());
        if state.data.external_ids.contains_key(&key) {
            bail!("external id {}.{} already exists", module, name);
        }
        state.data.external_ids.insert(key, target.clone());
        Ok(())
    }
}

#[async_trait]
impl SchemaChannel for InMemoryStore {
    async fn tables_with_column(&self, column: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .state()
            .data
            .tables
            .iter()
            .filter(|(_, columns)| columns.contains_key(column))
            .map(|(table, _)| table.clone())
            .collect())
    }

    async fn fill_null_column(
        &self,
        table: &str,
        column: &str,
        value: i64,
    ) -> anyhow::Result<u64> {
        let mut state = self.state();
        if state.failing_tables.contains(table) {
            bail!("update of {} rejected", table);
        }
        let rows = state
            .data
            .tables
            .get_mut(table)
            .and_then(|columns| columns.get_mut(column))
            .ok_or_else(|| anyhow!("column {}.{} does not exist", table, column))?;

        let mut updated = 0;
        for row in rows.iter_mut().filter(|r| r.is_none()) {
            *row = Some(value);
            updated += 1;
        }
        Ok(updated)
    }
}
