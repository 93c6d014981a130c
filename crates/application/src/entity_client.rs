use std::sync::Arc;

use warden_core::{AppError, AppResult, RequestContext};
use warden_domain::{EntityQuery, EntityRecord, EntityType, Mutation, MutationOutput};

use crate::EntityStore;
use crate::pipeline::{MutationPipeline, MutationScope};

/// Entry point for callers issuing mutations and reads through the pipeline.
///
/// Every call opens one store transaction; hooks and cascades share it.
#[derive(Clone)]
pub struct EntityClient {
    store: Arc<dyn EntityStore>,
    pipeline: Arc<MutationPipeline>,
}

impl EntityClient {
    /// Creates a client over a store and a frozen pipeline.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, pipeline: Arc<MutationPipeline>) -> Self {
        Self { store, pipeline }
    }

    /// Returns the pipeline shared by every transaction.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<MutationPipeline> {
        &self.pipeline
    }

    /// Opens a transaction for several mutations that commit together.
    pub async fn begin(&self, ctx: &RequestContext) -> AppResult<Transaction> {
        let transaction = ctx
            .cancellable("begin store transaction", self.store.begin())
            .await?;
        Ok(Transaction {
            scope: MutationScope::new(transaction),
            pipeline: self.pipeline.clone(),
        })
    }

    /// Runs one mutation in its own transaction.
    ///
    /// Commits on success and rolls back on any error, including a failed
    /// tuple write after the local create.
    pub async fn mutate(
        &self,
        ctx: &RequestContext,
        mutation: Mutation,
    ) -> AppResult<MutationOutput> {
        let transaction = self.begin(ctx).await?;
        match transaction.mutate(ctx, mutation).await {
            Ok(output) => {
                transaction.commit().await?;
                Ok(output)
            }
            Err(error) => {
                if error.is_client_error() {
                    tracing::debug!(error = %error, "mutation rejected");
                } else {
                    tracing::warn!(error = %error, "mutation failed, rolling back");
                }
                if let Err(rollback_error) = transaction.rollback().await {
                    tracing::warn!(
                        error = %rollback_error,
                        "failed to roll back store transaction"
                    );
                }
                Err(error)
            }
        }
    }

    /// Runs one read in its own transaction.
    pub async fn query(
        &self,
        ctx: &RequestContext,
        query: EntityQuery,
    ) -> AppResult<Vec<EntityRecord>> {
        let transaction = self.begin(ctx).await?;
        let records = transaction.query(ctx, query).await;
        transaction.rollback().await?;
        records
    }

    /// Loads one visible row by id.
    pub async fn get(
        &self,
        ctx: &RequestContext,
        entity_type: &EntityType,
        id: &str,
    ) -> AppResult<EntityRecord> {
        let transaction = self.begin(ctx).await?;
        let record = transaction.get(ctx, entity_type, id).await;
        transaction.rollback().await?;
        record
    }
}

/// Open store transaction bound to the pipeline.
///
/// Dropping it without [`Transaction::commit`] leaves the store untouched.
pub struct Transaction {
    scope: MutationScope,
    pipeline: Arc<MutationPipeline>,
}

impl Transaction {
    /// Runs a mutation inside this transaction.
    pub async fn mutate(
        &self,
        ctx: &RequestContext,
        mutation: Mutation,
    ) -> AppResult<MutationOutput> {
        self.pipeline.run(ctx, &self.scope, mutation).await
    }

    /// Reads rows, seeing writes staged in this transaction.
    pub async fn query(
        &self,
        ctx: &RequestContext,
        query: EntityQuery,
    ) -> AppResult<Vec<EntityRecord>> {
        self.pipeline.query(ctx, &self.scope, query).await
    }

    /// Loads one visible row by id.
    pub async fn get(
        &self,
        ctx: &RequestContext,
        entity_type: &EntityType,
        id: &str,
    ) -> AppResult<EntityRecord> {
        self.query(ctx, EntityQuery::by_id(entity_type.clone(), id).limit(1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("{entity_type} '{id}' does not exist")))
    }

    /// Commits staged writes, then reports failures that hooks deferred
    /// until the local writes were durable.
    pub async fn commit(self) -> AppResult<()> {
        self.scope.transaction().commit().await?;

        let mut deferred = self.scope.take_deferred_failures().await.into_iter();
        let Some(first) = deferred.next() else {
            return Ok(());
        };
        for additional in deferred {
            tracing::warn!(error = %additional, "additional deferred failure after commit");
        }
        Err(first)
    }

    /// Discards staged writes.
    pub async fn rollback(self) -> AppResult<()> {
        self.scope.transaction().rollback().await
    }
}

#[cfg(test)]
mod tests;
