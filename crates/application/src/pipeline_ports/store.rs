use std::sync::Arc;

use async_trait::async_trait;
use warden_core::{AppResult, RequestContext};
use warden_domain::{EntityQuery, EntityRecord, Mutation, MutationOutput};

/// One open store transaction shared by every hook of a logical request.
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait StoreTransaction: Send + Sync {
    /// Applies a mutation and returns affected rows in their post-write state.
    async fn mutate(&self, ctx: &RequestContext, mutation: &Mutation) -> AppResult<MutationOutput>;

    /// Returns rows matching every query predicate.
    async fn query(&self, ctx: &RequestContext, query: &EntityQuery) -> AppResult<Vec<EntityRecord>>;

    /// Makes staged writes durable.
    async fn commit(&self) -> AppResult<()>;

    /// Discards staged writes.
    async fn rollback(&self) -> AppResult<()>;
}

/// Port for opening store transactions.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Opens a transaction.
    async fn begin(&self) -> AppResult<Arc<dyn StoreTransaction>>;
}
