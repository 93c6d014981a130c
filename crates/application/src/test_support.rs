use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use warden_core::{AppError, AppResult, RequestContext};
use warden_domain::{
    Capability, EntityQuery, EntityRecord, EntitySchema, EntityType, FieldDefinition, Mutation,
    MutationOp, MutationOutput, OpMask, OwnershipEdge, RelationshipTuple, SchemaRegistry,
};

use crate::pipeline::{HookRegistry, MutationPipeline};
use crate::policy::{AllowIfActor, AllowMutationOps, EntityPolicy};
use crate::{AuthorizationClient, EntityStore, PendingTupleCleanup, StoreTransaction, TupleCleanupBacklog};

pub(crate) fn widget() -> EntityType {
    EntityType::new("Widget").unwrap_or_else(|_| unreachable!())
}

pub(crate) fn part() -> EntityType {
    EntityType::new("Part").unwrap_or_else(|_| unreachable!())
}

/// `Widget` owns `Part` rows through a cascading `owner_id` edge.
pub(crate) fn schemas() -> Arc<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    let widget_schema = EntitySchema::new(widget())
        .with_field(FieldDefinition::new("name"))
        .with_capability(Capability::Audited)
        .with_capability(Capability::SoftDelete)
        .with_edge(OwnershipEdge::cascading(part(), "owner_id"))
        .with_owner_relation("owner");
    let part_schema = EntitySchema::new(part())
        .with_field(FieldDefinition::new("owner_id").required())
        .with_field(FieldDefinition::new("name"))
        .with_capability(Capability::Audited)
        .with_capability(Capability::SoftDelete)
        .with_owner_relation("owner");
    assert!(registry.register(widget_schema).is_ok());
    assert!(registry.register(part_schema).is_ok());
    Arc::new(registry)
}

pub(crate) fn allow_all() -> EntityPolicy {
    EntityPolicy::new()
        .with_mutation_rule(AllowMutationOps(OpMask::ALL))
        .with_query_rule(AllowIfActor)
}

/// Registry with permissive policies for both test types and no hooks.
pub(crate) fn registry() -> HookRegistry {
    let mut registry = HookRegistry::new(schemas());
    assert!(registry.register_policy(&widget(), allow_all()).is_ok());
    assert!(registry.register_policy(&part(), allow_all()).is_ok());
    registry
}

pub(crate) fn widget_pipeline() -> MutationPipeline {
    registry().build()
}

/// Store transaction over an in-memory row list that records every mutation.
#[derive(Default)]
pub(crate) struct CapturingTransaction {
    rows: Mutex<Vec<EntityRecord>>,
    mutations: Mutex<Vec<Mutation>>,
    committed: AtomicBool,
    rolled_back: AtomicBool,
}

impl CapturingTransaction {
    pub(crate) async fn seed(&self, record: EntityRecord) {
        self.rows.lock().await.push(record);
    }

    pub(crate) async fn rows(&self) -> Vec<EntityRecord> {
        self.rows.lock().await.clone()
    }

    pub(crate) async fn mutations(&self) -> Vec<Mutation> {
        self.mutations.lock().await.clone()
    }

    pub(crate) async fn last_mutation(&self) -> Option<Mutation> {
        self.mutations.lock().await.last().cloned()
    }

    pub(crate) fn is_committed(&self) -> bool {
        self.committed.load(Ordering::SeqCst)
    }

    pub(crate) fn is_rolled_back(&self) -> bool {
        self.rolled_back.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreTransaction for CapturingTransaction {
    async fn mutate(&self, _: &RequestContext, mutation: &Mutation) -> AppResult<MutationOutput> {
        self.mutations.lock().await.push(mutation.clone());
        let mut rows = self.rows.lock().await;

        match mutation.op() {
            MutationOp::Create => {
                let id = format!(
                    "{}-{}",
                    mutation.entity_type().tuple_namespace(),
                    rows.len() + 1
                );
                let record = mutation.to_new_record(id)?;
                rows.push(record.clone());
                Ok(MutationOutput::new(vec![record]))
            }
            MutationOp::Update | MutationOp::UpdateOne => {
                let mut affected = Vec::new();
                for row in rows.iter_mut().filter(|row| mutation.selects(row)) {
                    mutation.apply_update(row);
                    affected.push(row.clone());
                }
                if mutation.op() == MutationOp::UpdateOne && affected.is_empty() {
                    return Err(AppError::NotFound("no row matched".to_owned()));
                }
                Ok(MutationOutput::new(affected))
            }
            MutationOp::Delete | MutationOp::DeleteOne => {
                let (removed, kept): (Vec<_>, Vec<_>) =
                    rows.drain(..).partition(|row| mutation.selects(row));
                *rows = kept;
                if mutation.op() == MutationOp::DeleteOne && removed.is_empty() {
                    return Err(AppError::NotFound("no row matched".to_owned()));
                }
                Ok(MutationOutput::new(removed))
            }
        }
    }

    async fn query(&self, _: &RequestContext, query: &EntityQuery) -> AppResult<Vec<EntityRecord>> {
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .filter(|row| query.matches(row))
            .cloned()
            .collect())
    }

    async fn commit(&self) -> AppResult<()> {
        self.committed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> AppResult<()> {
        self.rolled_back.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Store that hands out the same capturing transaction on every begin.
pub(crate) struct SharedTransactionStore {
    pub(crate) transaction: Arc<CapturingTransaction>,
}

#[async_trait]
impl EntityStore for SharedTransactionStore {
    async fn begin(&self) -> AppResult<Arc<dyn StoreTransaction>> {
        Ok(self.transaction.clone())
    }
}

/// Authorization client that records calls and fails on demand.
#[derive(Default)]
pub(crate) struct RecordingAuthorizationClient {
    pub(crate) written: Mutex<Vec<RelationshipTuple>>,
    pub(crate) deleted_objects: Mutex<Vec<String>>,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
}

impl RecordingAuthorizationClient {
    pub(crate) fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_deletes(&self, failing: bool) {
        self.fail_deletes.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthorizationClient for RecordingAuthorizationClient {
    async fn write_tuples(&self, tuples: &[RelationshipTuple]) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Internal("authorization service unavailable".to_owned()));
        }
        self.written.lock().await.extend_from_slice(tuples);
        Ok(())
    }

    async fn delete_all_object_relations(&self, object: &str) -> AppResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(AppError::Internal("authorization service unavailable".to_owned()));
        }
        self.deleted_objects.lock().await.push(object.to_owned());
        Ok(())
    }

    async fn check(&self, _: &str, _: &str, _: &str) -> AppResult<bool> {
        Ok(false)
    }
}

/// Backlog kept in memory, oldest entry first.
#[derive(Default)]
pub(crate) struct RecordingBacklog {
    pub(crate) entries: Mutex<Vec<PendingTupleCleanup>>,
}

#[async_trait]
impl TupleCleanupBacklog for RecordingBacklog {
    async fn record_pending(&self, object: &str, reason: &str) -> AppResult<()> {
        let mut entries = self.entries.lock().await;
        let cleanup_id = format!("cleanup-{}", entries.len() + 1);
        entries.push(PendingTupleCleanup {
            cleanup_id,
            object: object.to_owned(),
            reason: reason.to_owned(),
            attempts: 1,
        });
        Ok(())
    }

    async fn list_pending(&self, limit: usize) -> AppResult<Vec<PendingTupleCleanup>> {
        Ok(self.entries.lock().await.iter().take(limit).cloned().collect())
    }

    async fn mark_resolved(&self, cleanup_id: &str) -> AppResult<()> {
        self.entries
            .lock()
            .await
            .retain(|entry| entry.cleanup_id != cleanup_id);
        Ok(())
    }

    async fn mark_attempt_failed(&self, cleanup_id: &str, reason: &str) -> AppResult<()> {
        for entry in self.entries.lock().await.iter_mut() {
            if entry.cleanup_id == cleanup_id {
                entry.attempts += 1;
                entry.reason = reason.to_owned();
            }
        }
        Ok(())
    }
}
