use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;
use warden_application::{EntityStore, StoreTransaction};
use warden_core::{AppError, AppResult, RequestContext};
use warden_domain::{
    EntityQuery, EntityRecord, Mutation, MutationOp, MutationOutput, SchemaRegistry,
};

use crate::audit_clock::strictly_after;

type Rows = BTreeMap<String, EntityRecord>;

/// In-memory entity store for tests and local runs.
///
/// Each transaction works on a snapshot of committed rows and writes back
/// only the rows it touched, so concurrent writers to the same row resolve as
/// last commit wins.
pub struct InMemoryEntityStore {
    schemas: Arc<SchemaRegistry>,
    rows: Arc<RwLock<Rows>>,
}

impl InMemoryEntityStore {
    /// Creates an empty store over the schema registry.
    #[must_use]
    pub fn new(schemas: Arc<SchemaRegistry>) -> Self {
        Self {
            schemas,
            rows: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Returns every committed row, soft-deleted ones included.
    pub async fn snapshot(&self) -> Vec<EntityRecord> {
        self.rows.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn begin(&self) -> AppResult<Arc<dyn StoreTransaction>> {
        let staged = self.rows.read().await.clone();
        Ok(Arc::new(InMemoryTransaction {
            schemas: self.schemas.clone(),
            committed: self.rows.clone(),
            state: Mutex::new(TransactionState {
                rows: staged,
                touched: BTreeSet::new(),
                finished: false,
            }),
        }))
    }
}

struct TransactionState {
    rows: Rows,
    touched: BTreeSet<String>,
    finished: bool,
}

impl TransactionState {
    fn ensure_open(&self) -> AppResult<()> {
        if self.finished {
            return Err(AppError::Internal(
                "store transaction is already committed or rolled back".to_owned(),
            ));
        }
        Ok(())
    }

    fn selected_ids(&self, mutation: &Mutation) -> Vec<String> {
        self.rows
            .values()
            .filter(|row| mutation.selects(row))
            .map(|row| row.id().to_owned())
            .collect()
    }
}

struct InMemoryTransaction {
    schemas: Arc<SchemaRegistry>,
    committed: Arc<RwLock<Rows>>,
    state: Mutex<TransactionState>,
}

impl InMemoryTransaction {
    fn ensure_unique(&self, rows: &Rows, candidate: &EntityRecord) -> AppResult<()> {
        if candidate.is_deleted() {
            return Ok(());
        }

        let schema = self.schemas.require(candidate.entity_type())?;
        for field in schema.fields().iter().filter(|field| field.is_unique()) {
            let Some(value) = candidate.field(field.name()).filter(|value| !value.is_null())
            else {
                continue;
            };

            let taken = rows.values().any(|row| {
                row.id() != candidate.id()
                    && row.entity_type() == candidate.entity_type()
                    && !row.is_deleted()
                    && row.field(field.name()) == Some(value)
            });
            if taken {
                return Err(AppError::Constraint(format!(
                    "{} with {} {value} already exists",
                    candidate.entity_type(),
                    field.name()
                )));
            }
        }

        Ok(())
    }

    fn create(&self, state: &mut TransactionState, mutation: &Mutation) -> AppResult<MutationOutput> {
        let record = mutation.to_new_record(Uuid::new_v4().to_string())?;
        self.ensure_unique(&state.rows, &record)?;

        state.touched.insert(record.id().to_owned());
        state.rows.insert(record.id().to_owned(), record.clone());
        Ok(MutationOutput::new(vec![record]))
    }

    fn update(&self, state: &mut TransactionState, mutation: &Mutation) -> AppResult<MutationOutput> {
        let mut affected = Vec::new();
        for id in state.selected_ids(mutation) {
            let Some(mut row) = state.rows.get(&id).cloned() else {
                continue;
            };
            let previous_update = row.audit().updated_at;
            mutation.apply_update(&mut row);
            if mutation.audit().updated_at.is_some() {
                row.audit_mut().updated_at = strictly_after(previous_update, row.audit().updated_at);
            }
            self.ensure_unique(&state.rows, &row)?;

            state.touched.insert(id.clone());
            state.rows.insert(id, row.clone());
            affected.push(row);
        }

        if mutation.op() == MutationOp::UpdateOne && affected.is_empty() {
            return Err(not_found(mutation));
        }
        Ok(MutationOutput::new(affected))
    }

    fn delete(&self, state: &mut TransactionState, mutation: &Mutation) -> AppResult<MutationOutput> {
        let mut removed = Vec::new();
        for id in state.selected_ids(mutation) {
            self.remove_with_dependents(state, &id, &mut removed)?;
        }

        if mutation.op() == MutationOp::DeleteOne && removed.is_empty() {
            return Err(not_found(mutation));
        }
        Ok(MutationOutput::new(removed))
    }

    /// Hard-deletes a row and, along cascading edges, every row referencing it.
    fn remove_with_dependents(
        &self,
        state: &mut TransactionState,
        id: &str,
        removed: &mut Vec<EntityRecord>,
    ) -> AppResult<()> {
        let Some(row) = state.rows.get(id).cloned() else {
            return Ok(());
        };
        let schema = self.schemas.require(row.entity_type())?;

        for edge in schema.edges() {
            let dependents: Vec<String> = state
                .rows
                .values()
                .filter(|candidate| {
                    candidate.entity_type() == edge.dependent_type()
                        && candidate
                            .field(edge.foreign_key())
                            .and_then(serde_json::Value::as_str)
                            == Some(id)
                })
                .map(|candidate| candidate.id().to_owned())
                .collect();
            if dependents.is_empty() {
                continue;
            }
            if !edge.is_cascade() {
                return Err(AppError::Constraint(format!(
                    "{} '{id}' is still referenced by {} {} row(s)",
                    row.entity_type(),
                    dependents.len(),
                    edge.dependent_type()
                )));
            }
            for dependent in dependents {
                self.remove_with_dependents(state, &dependent, removed)?;
            }
        }

        if let Some(row) = state.rows.remove(id) {
            state.touched.insert(id.to_owned());
            removed.push(row);
        }
        Ok(())
    }
}

fn not_found(mutation: &Mutation) -> AppError {
    AppError::NotFound(format!(
        "{} '{}' does not exist or was already deleted",
        mutation.entity_type(),
        mutation.target_id().unwrap_or_default()
    ))
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn mutate(&self, _: &RequestContext, mutation: &Mutation) -> AppResult<MutationOutput> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;

        match mutation.op() {
            MutationOp::Create => self.create(&mut state, mutation),
            MutationOp::Update | MutationOp::UpdateOne => self.update(&mut state, mutation),
            MutationOp::Delete | MutationOp::DeleteOne => self.delete(&mut state, mutation),
        }
    }

    async fn query(&self, _: &RequestContext, query: &EntityQuery) -> AppResult<Vec<EntityRecord>> {
        let state = self.state.lock().await;
        state.ensure_open()?;

        let mut records: Vec<EntityRecord> = state
            .rows
            .values()
            .filter(|row| query.matches(row))
            .cloned()
            .collect();
        records.sort_by(|left, right| {
            left.audit()
                .created_at
                .cmp(&right.audit().created_at)
                .then_with(|| left.id().cmp(right.id()))
        });
        if let Some(limit) = query.row_limit() {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn commit(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        state.finished = true;

        let mut committed = self.committed.write().await;
        for id in std::mem::take(&mut state.touched) {
            match state.rows.get(&id) {
                Some(row) => {
                    committed.insert(id, row.clone());
                }
                None => {
                    committed.remove(&id);
                }
            }
        }
        Ok(())
    }

    async fn rollback(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.finished = true;
        state.touched.clear();
        Ok(())
    }
}
