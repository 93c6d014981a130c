use std::sync::Arc;

use serde_json::json;
use warden_core::{AppError, CancellationSignal, RequestContext};
use warden_domain::{Mutation, OpMask, RelationshipTuple};

use super::{ParentLink, TupleSyncHook};
use crate::pipeline::{MutationPipeline, MutationScope};
use crate::test_support::{
    CapturingTransaction, RecordingAuthorizationClient, RecordingBacklog, part, registry, widget,
};
use crate::{SoftDeleteHook, TupleCleanupBacklog};

fn sync_pipeline(hook: TupleSyncHook, soft_delete: bool) -> MutationPipeline {
    let hook = Arc::new(hook);
    let mut registry = registry();
    for entity_type in [widget(), part()] {
        if soft_delete {
            assert!(
                registry
                    .register_hook(&entity_type, OpMask::ALL, Arc::new(SoftDeleteHook))
                    .is_ok()
            );
        }
        assert!(
            registry
                .register_hook(&entity_type, OpMask::ALL, hook.clone())
                .is_ok()
        );
    }
    registry.build()
}

fn open_scope() -> (Arc<CapturingTransaction>, MutationScope) {
    let transaction = Arc::new(CapturingTransaction::default());
    let scope = MutationScope::new(transaction.clone());
    (transaction, scope)
}

fn owned_part(owner_id: &str) -> Mutation {
    Mutation::create(part())
        .with_field("owner_id", json!(owner_id))
        .and_then(|mutation| mutation.with_field("name", json!("Handle")))
        .unwrap_or_else(|error| panic!("invalid mutation: {error}"))
}

#[tokio::test]
async fn create_writes_owner_tuple_after_store_call() {
    let authorization = Arc::new(RecordingAuthorizationClient::default());
    let pipeline = sync_pipeline(TupleSyncHook::new(authorization.clone()), false);
    let (transaction, scope) = open_scope();
    let ctx = RequestContext::new().with_actor("alice");

    let created = pipeline
        .run(&ctx, &scope, Mutation::create(widget()))
        .await
        .unwrap_or_else(|error| panic!("create failed: {error}"));

    assert_eq!(transaction.mutations().await.len(), 1);
    let record = created.into_single().unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(
        *authorization.written.lock().await,
        vec![RelationshipTuple::new(
            "user:alice",
            "owner",
            format!("widget:{}", record.id())
        )]
    );
}

#[tokio::test]
async fn parent_links_add_tuples_from_foreign_keys() {
    let authorization = Arc::new(RecordingAuthorizationClient::default());
    let hook = TupleSyncHook::new(authorization.clone())
        .with_parent_link(ParentLink::new("owner_id", widget(), "parent"));
    let pipeline = sync_pipeline(hook, false);
    let (_, scope) = open_scope();
    let ctx = RequestContext::new().with_actor("alice");

    let created = pipeline
        .run(&ctx, &scope, owned_part("w-9"))
        .await
        .unwrap_or_else(|error| panic!("create failed: {error}"));
    let part_ref = format!("part:{}", created.records()[0].id());

    let written = authorization.written.lock().await;
    assert!(written.contains(&RelationshipTuple::new("user:alice", "owner", part_ref.clone())));
    assert!(written.contains(&RelationshipTuple::new("widget:w-9", "parent", part_ref)));
}

#[tokio::test]
async fn failed_tuple_write_surfaces_as_auth_sync() {
    let authorization = Arc::new(RecordingAuthorizationClient::default());
    authorization.fail_writes();
    let pipeline = sync_pipeline(TupleSyncHook::new(authorization.clone()), false);
    let (_, scope) = open_scope();
    let ctx = RequestContext::new().with_actor("alice");

    let result = pipeline.run(&ctx, &scope, Mutation::create(widget())).await;

    assert!(matches!(result, Err(AppError::AuthSync(_))));
    assert!(scope.take_deferred_failures().await.is_empty());
}

#[tokio::test]
async fn failed_store_call_writes_no_tuples() {
    let authorization = Arc::new(RecordingAuthorizationClient::default());
    let pipeline = sync_pipeline(TupleSyncHook::new(authorization.clone()), false);
    let (_, scope) = open_scope();
    let ctx = RequestContext::new().with_actor("alice");

    // Parts require an owner id, so validation fails before the store.
    let result = pipeline.run(&ctx, &scope, Mutation::create(part())).await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    assert!(authorization.written.lock().await.is_empty());
}

#[tokio::test]
async fn cancelled_request_writes_no_further_tuples() {
    let authorization = Arc::new(RecordingAuthorizationClient::default());
    let pipeline = sync_pipeline(TupleSyncHook::new(authorization.clone()), false);
    let (_, scope) = open_scope();
    let (handle, signal) = CancellationSignal::pair();
    let ctx = RequestContext::new().with_actor("alice").with_cancellation(signal);

    let widget_created = pipeline.run(&ctx, &scope, Mutation::create(widget())).await;
    assert!(widget_created.is_ok());

    handle.cancel();
    let result = pipeline.run(&ctx, &scope, Mutation::create(widget())).await;
    assert!(matches!(result, Err(AppError::Cancelled(_))));
    assert_eq!(authorization.written.lock().await.len(), 1);
}

#[tokio::test]
async fn soft_delete_removes_object_relations() {
    let authorization = Arc::new(RecordingAuthorizationClient::default());
    let pipeline = sync_pipeline(TupleSyncHook::new(authorization.clone()), true);
    let (_, scope) = open_scope();
    let ctx = RequestContext::new().with_actor("alice");

    let created = pipeline
        .run(&ctx, &scope, Mutation::create(widget()))
        .await
        .unwrap_or_else(|error| panic!("create failed: {error}"));
    let id = created.records()[0].id().to_owned();

    let update = Mutation::update_one(widget(), id.clone())
        .with_field("name", json!("Hammer"))
        .unwrap_or_else(|_| unreachable!());
    assert!(pipeline.run(&ctx, &scope, update).await.is_ok());
    assert!(authorization.deleted_objects.lock().await.is_empty());

    let deleted = pipeline
        .run(&ctx, &scope, Mutation::delete_one(widget(), id.clone()))
        .await;
    assert!(deleted.is_ok());
    assert_eq!(
        *authorization.deleted_objects.lock().await,
        vec![format!("widget:{id}")]
    );
}

#[tokio::test]
async fn failed_cleanup_is_deferred_and_recorded() {
    let authorization = Arc::new(RecordingAuthorizationClient::default());
    let backlog = Arc::new(RecordingBacklog::default());
    let hook = TupleSyncHook::new(authorization.clone()).with_backlog(backlog.clone());
    let pipeline = sync_pipeline(hook, true);
    let (transaction, scope) = open_scope();
    let ctx = RequestContext::new().with_actor("alice");

    let created = pipeline
        .run(&ctx, &scope, Mutation::create(widget()))
        .await
        .unwrap_or_else(|error| panic!("create failed: {error}"));
    let id = created.records()[0].id().to_owned();

    authorization.fail_deletes(true);
    let deleted = pipeline
        .run(&ctx, &scope, Mutation::delete_one(widget(), id.clone()))
        .await;

    assert!(deleted.is_ok());
    assert!(transaction.rows().await.iter().all(|row| row.is_deleted()));
    let deferred = scope.take_deferred_failures().await;
    assert_eq!(deferred.len(), 1);
    assert!(matches!(deferred[0], AppError::Internal(_)));

    let pending = backlog.list_pending(10).await.unwrap_or_default();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].object, format!("widget:{id}"));
}

#[tokio::test]
async fn hard_delete_removes_object_relations() {
    let authorization = Arc::new(RecordingAuthorizationClient::default());
    let pipeline = sync_pipeline(TupleSyncHook::new(authorization.clone()), true);
    let (transaction, scope) = open_scope();
    let ctx = RequestContext::new().with_actor("alice");

    let created = pipeline
        .run(&ctx, &scope, Mutation::create(widget()))
        .await
        .unwrap_or_else(|error| panic!("create failed: {error}"));
    let id = created.records()[0].id().to_owned();

    let deleted = pipeline
        .run(
            &ctx.with_skip_soft_delete(),
            &scope,
            Mutation::delete_one(widget(), id.clone()),
        )
        .await;

    assert!(deleted.is_ok());
    assert!(transaction.rows().await.is_empty());
    assert_eq!(
        *authorization.deleted_objects.lock().await,
        vec![format!("widget:{id}")]
    );
}

#[test]
fn parent_link_ignores_missing_foreign_key() {
    let link = ParentLink::new("owner_id", widget(), "parent");
    let record = warden_domain::EntityRecord::new(
        "p-1",
        part(),
        serde_json::Map::new(),
        warden_domain::AuditFields::default(),
    )
    .unwrap_or_else(|error| panic!("{error}"));

    assert!(link.tuple_for(&record).is_none());
}
