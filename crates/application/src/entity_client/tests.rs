use std::sync::Arc;

use warden_core::{AppError, RequestContext};
use warden_domain::{Mutation, OpMask};

use super::EntityClient;
use crate::test_support::{
    CapturingTransaction, RecordingAuthorizationClient, SharedTransactionStore, registry, widget,
};
use crate::{SoftDeleteFilter, SoftDeleteHook, TupleSyncHook};

fn client(
    authorization: Arc<RecordingAuthorizationClient>,
) -> (Arc<CapturingTransaction>, EntityClient) {
    let mut registry = registry();
    assert!(
        registry
            .register_hook(&widget(), OpMask::ALL, Arc::new(SoftDeleteHook))
            .is_ok()
    );
    assert!(
        registry
            .register_hook(
                &widget(),
                OpMask::ALL,
                Arc::new(TupleSyncHook::new(authorization))
            )
            .is_ok()
    );
    assert!(
        registry
            .register_interceptor(&widget(), Arc::new(SoftDeleteFilter))
            .is_ok()
    );

    let transaction = Arc::new(CapturingTransaction::default());
    let store = Arc::new(SharedTransactionStore {
        transaction: transaction.clone(),
    });
    (transaction, EntityClient::new(store, Arc::new(registry.build())))
}

#[tokio::test]
async fn successful_mutation_commits() {
    let authorization = Arc::new(RecordingAuthorizationClient::default());
    let (transaction, client) = client(authorization.clone());
    let ctx = RequestContext::new().with_actor("alice");

    let result = client.mutate(&ctx, Mutation::create(widget())).await;

    assert!(result.is_ok());
    assert!(transaction.is_committed());
    assert!(!transaction.is_rolled_back());
    assert_eq!(authorization.written.lock().await.len(), 1);
}

#[tokio::test]
async fn failed_tuple_write_rolls_back() {
    let authorization = Arc::new(RecordingAuthorizationClient::default());
    authorization.fail_writes();
    let (transaction, client) = client(authorization);
    let ctx = RequestContext::new().with_actor("alice");

    let result = client.mutate(&ctx, Mutation::create(widget())).await;

    assert!(matches!(result, Err(AppError::AuthSync(_))));
    assert!(transaction.is_rolled_back());
    assert!(!transaction.is_committed());
}

#[tokio::test]
async fn failed_cleanup_commits_then_reports_internal_error() {
    let authorization = Arc::new(RecordingAuthorizationClient::default());
    let (transaction, client) = client(authorization.clone());
    let ctx = RequestContext::new().with_actor("alice");

    let created = client
        .mutate(&ctx, Mutation::create(widget()))
        .await
        .unwrap_or_else(|error| panic!("create failed: {error}"));
    let id = created.records()[0].id().to_owned();

    authorization.fail_deletes(true);
    let deleted = client
        .mutate(&ctx, Mutation::delete_one(widget(), id.clone()))
        .await;

    assert!(matches!(deleted, Err(AppError::Internal(_))));
    assert!(transaction.is_committed());
    assert!(!transaction.is_rolled_back());
    assert!(transaction.rows().await.iter().all(|row| row.is_deleted()));
}

#[tokio::test]
async fn get_hides_soft_deleted_rows() {
    let authorization = Arc::new(RecordingAuthorizationClient::default());
    let (_, client) = client(authorization);
    let ctx = RequestContext::new().with_actor("alice");

    let created = client
        .mutate(&ctx, Mutation::create(widget()))
        .await
        .unwrap_or_else(|error| panic!("create failed: {error}"));
    let id = created.records()[0].id().to_owned();
    assert!(client.get(&ctx, &widget(), &id).await.is_ok());

    assert!(
        client
            .mutate(&ctx, Mutation::delete_one(widget(), id.clone()))
            .await
            .is_ok()
    );

    let hidden = client.get(&ctx, &widget(), &id).await;
    assert!(matches!(hidden, Err(AppError::NotFound(_))));

    let visible = client.get(&ctx.with_skip_soft_delete(), &widget(), &id).await;
    assert!(visible.is_ok_and(|record| record.is_deleted()));
}

#[tokio::test]
async fn explicit_transaction_sees_its_own_writes() {
    let authorization = Arc::new(RecordingAuthorizationClient::default());
    let (transaction, client) = client(authorization);
    let ctx = RequestContext::new().with_actor("alice");

    let open = client
        .begin(&ctx)
        .await
        .unwrap_or_else(|error| panic!("begin failed: {error}"));
    let created = open
        .mutate(&ctx, Mutation::create(widget()))
        .await
        .unwrap_or_else(|error| panic!("create failed: {error}"));
    let id = created.records()[0].id().to_owned();

    assert!(open.get(&ctx, &widget(), &id).await.is_ok());
    assert!(!transaction.is_committed());

    assert!(open.commit().await.is_ok());
    assert!(transaction.is_committed());
}

#[tokio::test]
async fn anonymous_reads_are_denied() {
    let authorization = Arc::new(RecordingAuthorizationClient::default());
    let (_, client) = client(authorization);

    let result = client.get(&RequestContext::new(), &widget(), "w-1").await;

    assert!(matches!(result, Err(AppError::PermissionDenied { .. })));
}
