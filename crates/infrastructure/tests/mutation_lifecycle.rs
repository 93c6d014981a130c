//! End-to-end lifecycle of catalog entities over the in-memory adapters.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;
use warden_application::{
    AuthorizationClient, EntityClient, EntityStore, GROUP, ORGANIZATION, ORGANIZATION_SETTING,
    StoreTransaction, TupleCleanupBacklog, TupleReconciliationService, build_default_pipeline,
    default_schemas,
};
use warden_core::{AppError, AppResult, PolicyDecision, RequestContext};
use warden_domain::{
    EntityQuery, EntityRecord, EntityType, Mutation, MutationOutput, Predicate, RelationshipTuple,
};
use warden_infrastructure::{
    InMemoryAuthorizationClient, InMemoryEntityStore, InMemoryTupleCleanupBacklog,
};

#[derive(Default)]
struct FlakyAuthorizationClient {
    inner: InMemoryAuthorizationClient,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    write_calls: AtomicUsize,
}

#[async_trait]
impl AuthorizationClient for FlakyAuthorizationClient {
    async fn write_tuples(&self, tuples: &[RelationshipTuple]) -> AppResult<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Internal(
                "authorization service unavailable".to_owned(),
            ));
        }
        self.inner.write_tuples(tuples).await
    }

    async fn delete_all_object_relations(&self, object: &str) -> AppResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(AppError::Internal(
                "authorization service unavailable".to_owned(),
            ));
        }
        self.inner.delete_all_object_relations(object).await
    }

    async fn check(&self, subject: &str, relation: &str, object: &str) -> AppResult<bool> {
        self.inner.check(subject, relation, object).await
    }
}

struct SpyStore {
    inner: Arc<InMemoryEntityStore>,
    mutations: Arc<AtomicUsize>,
}

struct SpyTransaction {
    inner: Arc<dyn StoreTransaction>,
    mutations: Arc<AtomicUsize>,
}

#[async_trait]
impl EntityStore for SpyStore {
    async fn begin(&self) -> AppResult<Arc<dyn StoreTransaction>> {
        Ok(Arc::new(SpyTransaction {
            inner: self.inner.begin().await?,
            mutations: self.mutations.clone(),
        }))
    }
}

#[async_trait]
impl StoreTransaction for SpyTransaction {
    async fn mutate(&self, ctx: &RequestContext, mutation: &Mutation) -> AppResult<MutationOutput> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.inner.mutate(ctx, mutation).await
    }

    async fn query(&self, ctx: &RequestContext, query: &EntityQuery) -> AppResult<Vec<EntityRecord>> {
        self.inner.query(ctx, query).await
    }

    async fn commit(&self) -> AppResult<()> {
        self.inner.commit().await
    }

    async fn rollback(&self) -> AppResult<()> {
        self.inner.rollback().await
    }
}

struct Harness {
    store: Arc<InMemoryEntityStore>,
    store_mutations: Arc<AtomicUsize>,
    authorization: Arc<FlakyAuthorizationClient>,
    backlog: Arc<InMemoryTupleCleanupBacklog>,
    client: EntityClient,
}

impl Harness {
    fn new() -> Self {
        let schemas = Arc::new(default_schemas().unwrap_or_else(|error| panic!("{error}")));
        let store = Arc::new(InMemoryEntityStore::new(schemas.clone()));
        let store_mutations = Arc::new(AtomicUsize::new(0));
        let authorization = Arc::new(FlakyAuthorizationClient::default());
        let backlog = Arc::new(InMemoryTupleCleanupBacklog::new());

        let pipeline = build_default_pipeline(
            schemas,
            authorization.clone(),
            Some(backlog.clone() as Arc<dyn TupleCleanupBacklog>),
        )
        .unwrap_or_else(|error| panic!("pipeline wiring failed: {error}"));
        let spy = Arc::new(SpyStore {
            inner: store.clone(),
            mutations: store_mutations.clone(),
        });

        Self {
            store,
            store_mutations,
            authorization,
            backlog,
            client: EntityClient::new(spy, Arc::new(pipeline)),
        }
    }

    async fn create_organization(&self, ctx: &RequestContext, name: &str) -> EntityRecord {
        let mutation = Mutation::create(named(ORGANIZATION))
            .with_field("name", json!(name))
            .unwrap_or_else(|_| unreachable!());
        self.client
            .mutate(ctx, mutation)
            .await
            .and_then(MutationOutput::into_single)
            .unwrap_or_else(|error| panic!("organization create failed: {error}"))
    }

    async fn create_group(&self, ctx: &RequestContext, owner_id: &str, name: &str) -> EntityRecord {
        let mutation = Mutation::create(named(GROUP))
            .with_field("owner_id", json!(owner_id))
            .and_then(|mutation| mutation.with_field("name", json!(name)))
            .unwrap_or_else(|_| unreachable!());
        self.client
            .mutate(ctx, mutation)
            .await
            .and_then(MutationOutput::into_single)
            .unwrap_or_else(|error| panic!("group create failed: {error}"))
    }
}

fn named(name: &str) -> EntityType {
    EntityType::new(name).unwrap_or_else(|_| unreachable!())
}

fn alice() -> RequestContext {
    RequestContext::new().with_actor("alice")
}

#[tokio::test]
async fn audit_columns_follow_create_and_update() {
    let harness = Harness::new();
    let ctx = alice();
    let created = harness.create_organization(&ctx, "Acme").await;

    let audit = created.audit();
    assert!(audit.created_at.is_some());
    assert_eq!(audit.created_by.as_deref(), Some("alice"));
    assert_eq!(audit.updated_at, audit.created_at);

    let bob = RequestContext::new().with_actor("bob");
    assert!(
        harness
            .authorization
            .write_tuples(&[RelationshipTuple::new(
                "user:bob",
                "admin",
                format!("organization:{}", created.id()),
            )])
            .await
            .is_ok()
    );
    let mut previous = created.clone();
    for display_name in ["Acme Corp", "Acme Inc"] {
        let update = Mutation::update_one(named(ORGANIZATION), created.id())
            .with_field("display_name", json!(display_name))
            .unwrap_or_else(|_| unreachable!());
        let updated = harness
            .client
            .mutate(&bob, update)
            .await
            .and_then(MutationOutput::into_single)
            .unwrap_or_else(|error| panic!("update failed: {error}"));

        assert!(updated.audit().updated_at > previous.audit().updated_at);
        assert_eq!(updated.audit().updated_by.as_deref(), Some("bob"));
        assert_eq!(updated.audit().created_at, created.audit().created_at);
        assert_eq!(updated.audit().created_by.as_deref(), Some("alice"));
        previous = updated;
    }
}

#[tokio::test]
async fn deleted_organization_is_only_visible_when_skipping_the_filter() {
    let harness = Harness::new();
    let ctx = alice();
    let organization = harness.create_organization(&ctx, "Acme").await;

    let deleted = harness
        .client
        .mutate(&ctx, Mutation::delete_one(named(ORGANIZATION), organization.id()))
        .await;
    assert!(deleted.is_ok());

    let default_read = harness
        .client
        .get(&ctx, &named(ORGANIZATION), organization.id())
        .await;
    assert!(matches!(default_read, Err(AppError::NotFound(_))));

    let unfiltered = ctx.with_skip_soft_delete();
    let first = harness
        .client
        .get(&unfiltered, &named(ORGANIZATION), organization.id())
        .await
        .unwrap_or_else(|error| panic!("skip-filter read failed: {error}"));
    assert!(first.audit().deleted_at.is_some());
    assert_eq!(first.audit().deleted_by.as_deref(), Some("alice"));

    let second = harness
        .client
        .get(&unfiltered, &named(ORGANIZATION), organization.id())
        .await
        .unwrap_or_else(|error| panic!("skip-filter read failed: {error}"));
    assert_eq!(first, second);
}

#[tokio::test]
async fn denied_create_reaches_neither_store_nor_authorization() {
    let harness = Harness::new();
    let mutation = Mutation::create(named(ORGANIZATION))
        .with_field("name", json!("Acme"))
        .unwrap_or_else(|_| unreachable!());

    let result = harness.client.mutate(&RequestContext::new(), mutation).await;

    assert!(matches!(result, Err(AppError::PermissionDenied { .. })));
    assert_eq!(harness.store_mutations.load(Ordering::SeqCst), 0);
    assert_eq!(harness.authorization.write_calls.load(Ordering::SeqCst), 0);
    assert!(harness.store.snapshot().await.is_empty());
}

#[tokio::test]
async fn failed_tuple_write_leaves_no_organization_behind() {
    let harness = Harness::new();
    harness.authorization.fail_writes.store(true, Ordering::SeqCst);
    let ctx = alice();
    let mutation = Mutation::create(named(ORGANIZATION))
        .with_field("name", json!("Acme"))
        .unwrap_or_else(|_| unreachable!());

    let result = harness.client.mutate(&ctx, mutation).await;
    assert!(matches!(result, Err(AppError::AuthSync(_))));

    let visible = harness
        .client
        .query(
            &ctx,
            EntityQuery::new(named(ORGANIZATION)).filter(Predicate::field_eq("name", json!("Acme"))),
        )
        .await
        .unwrap_or_else(|error| panic!("read failed: {error}"));
    assert!(visible.is_empty());
    assert!(harness.store.snapshot().await.is_empty());
}

#[tokio::test]
async fn override_admits_an_anonymous_create() {
    let harness = Harness::new();
    let ctx = RequestContext::new().with_decision_override(PolicyDecision::Allow);

    let group = harness.create_group(&ctx, "o-1", "Imported").await;

    assert_eq!(harness.store.snapshot().await.len(), 1);
    assert_eq!(harness.authorization.write_calls.load(Ordering::SeqCst), 1);
    assert_eq!(group.audit().created_by.as_deref(), Some("unknown"));
}

#[tokio::test]
async fn deleting_an_organization_hides_its_groups() {
    let harness = Harness::new();
    let ctx = alice();
    let organization = harness.create_organization(&ctx, "Acme").await;
    let group = harness.create_group(&ctx, organization.id(), "Admins").await;

    let deleted = harness
        .client
        .mutate(&ctx, Mutation::delete_one(named(ORGANIZATION), organization.id()))
        .await;
    assert!(deleted.is_ok());

    let default_read = harness.client.get(&ctx, &named(GROUP), group.id()).await;
    assert!(matches!(default_read, Err(AppError::NotFound(_))));

    let hidden = harness
        .client
        .get(&ctx.with_skip_soft_delete(), &named(GROUP), group.id())
        .await
        .unwrap_or_else(|error| panic!("skip-filter read failed: {error}"));
    assert_eq!(hidden.fields(), group.fields());
    assert_eq!(hidden.audit().created_at, group.audit().created_at);
    assert!(hidden.is_deleted());

    let settings = harness
        .client
        .query(
            &ctx,
            EntityQuery::new(named(ORGANIZATION_SETTING))
                .filter(Predicate::field_eq("owner_id", json!(organization.id()))),
        )
        .await
        .unwrap_or_else(|error| panic!("read failed: {error}"));
    assert!(settings.is_empty());

    let group_tuples = harness
        .authorization
        .inner
        .tuples_for_object(&format!("group:{}", group.id()))
        .await;
    assert!(group_tuples.is_empty());
}

#[tokio::test]
async fn hard_delete_removes_tuples_of_cascaded_rows() {
    let harness = Harness::new();
    let ctx = alice();
    let organization = harness.create_organization(&ctx, "Acme").await;
    let group = harness.create_group(&ctx, organization.id(), "Admins").await;
    let group_ref = format!("group:{}", group.id());
    assert!(
        !harness
            .authorization
            .inner
            .tuples_for_object(&group_ref)
            .await
            .is_empty()
    );

    let deleted = harness
        .client
        .mutate(
            &ctx.with_skip_soft_delete(),
            Mutation::delete_one(named(ORGANIZATION), organization.id()),
        )
        .await
        .unwrap_or_else(|error| panic!("hard delete failed: {error}"));
    assert!(deleted.ids().any(|id| id == group.id()));

    assert!(harness.store.snapshot().await.is_empty());
    assert!(harness.authorization.inner.tuples().await.is_empty());
}

#[tokio::test]
async fn failed_tuple_cleanup_is_reported_and_reconciled() {
    let harness = Harness::new();
    let ctx = alice();
    let organization = harness.create_organization(&ctx, "Acme").await;
    let organization_ref = format!("organization:{}", organization.id());

    harness.authorization.fail_deletes.store(true, Ordering::SeqCst);
    let deleted = harness
        .client
        .mutate(&ctx, Mutation::delete_one(named(ORGANIZATION), organization.id()))
        .await;
    assert!(matches!(deleted, Err(AppError::Internal(_))));

    let default_read = harness
        .client
        .get(&ctx, &named(ORGANIZATION), organization.id())
        .await;
    assert!(matches!(default_read, Err(AppError::NotFound(_))));
    assert!(
        !harness
            .authorization
            .inner
            .tuples_for_object(&organization_ref)
            .await
            .is_empty()
    );

    let pending = harness
        .backlog
        .list_pending(10)
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert!(pending.iter().any(|entry| entry.object == organization_ref));

    harness.authorization.fail_deletes.store(false, Ordering::SeqCst);
    let service = TupleReconciliationService::new(harness.authorization.clone(), harness.backlog.clone());
    let report = service
        .reconcile_pending(&RequestContext::new(), 10)
        .await
        .unwrap_or_else(|error| panic!("reconciliation failed: {error}"));

    assert_eq!(report.attempted, pending.len());
    assert_eq!(report.resolved, pending.len());
    assert_eq!(report.failed, 0);
    assert!(
        harness
            .authorization
            .inner
            .tuples_for_object(&organization_ref)
            .await
            .is_empty()
    );
    assert!(
        harness
            .backlog
            .list_pending(10)
            .await
            .is_ok_and(|entries| entries.is_empty())
    );
}

#[tokio::test]
async fn organization_names_are_unique_among_active_rows() {
    let harness = Harness::new();
    let ctx = alice();
    let first = harness.create_organization(&ctx, "Acme").await;

    let duplicate = Mutation::create(named(ORGANIZATION))
        .with_field("name", json!("Acme"))
        .unwrap_or_else(|_| unreachable!());
    let result = harness.client.mutate(&ctx, duplicate).await;
    assert!(matches!(result, Err(AppError::Constraint(_))));

    assert!(
        harness
            .client
            .mutate(&ctx, Mutation::delete_one(named(ORGANIZATION), first.id()))
            .await
            .is_ok()
    );
    let recreated = harness.create_organization(&ctx, "Acme").await;
    assert_ne!(recreated.id(), first.id());
}
