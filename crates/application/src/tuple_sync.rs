use std::sync::Arc;

use async_trait::async_trait;
use warden_core::{AppError, AppResult, RequestContext, UNKNOWN_ACTOR};
use warden_domain::{
    EntityRecord, EntityType, Mutation, MutationOp, MutationOutput, RelationshipTuple,
    object_ref, user_subject,
};

use crate::pipeline::{MutationHook, MutationScope, Next};
use crate::{AuthorizationClient, TupleCleanupBacklog};

/// Extra tuple linking a created row to the parent named by one of its fields.
///
/// `ParentLink::new("owner_id", organization, "parent")` writes
/// `(organization:{owner_id}, parent, group:{id})` for every created group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    foreign_key: String,
    parent_type: EntityType,
    relation: String,
}

impl ParentLink {
    /// Creates a parent link.
    #[must_use]
    pub fn new(
        foreign_key: impl Into<String>,
        parent_type: EntityType,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            foreign_key: foreign_key.into(),
            parent_type,
            relation: relation.into(),
        }
    }

    fn tuple_for(&self, record: &EntityRecord) -> Option<RelationshipTuple> {
        let parent_id = record.field(&self.foreign_key)?.as_str()?;
        Some(RelationshipTuple::new(
            object_ref(&self.parent_type, parent_id),
            self.relation.clone(),
            object_ref(record.entity_type(), record.id()),
        ))
    }
}

/// Keeps relationship tuples in step with local writes.
///
/// Tuples are written only after the store call succeeds. A failed write on
/// create is returned so the enclosing transaction rolls back. A failed
/// cleanup on delete cannot undo the delete: it is logged, recorded in the
/// backlog when one is configured, and deferred so the caller sees it once
/// the transaction commits.
pub struct TupleSyncHook {
    authorization: Arc<dyn AuthorizationClient>,
    backlog: Option<Arc<dyn TupleCleanupBacklog>>,
    parent_links: Vec<ParentLink>,
}

impl TupleSyncHook {
    /// Creates a synchronizer over the authorization client.
    #[must_use]
    pub fn new(authorization: Arc<dyn AuthorizationClient>) -> Self {
        Self {
            authorization,
            backlog: None,
            parent_links: Vec::new(),
        }
    }

    /// Records failed cleanups for the reconciler.
    #[must_use]
    pub fn with_backlog(mut self, backlog: Arc<dyn TupleCleanupBacklog>) -> Self {
        self.backlog = Some(backlog);
        self
    }

    /// Adds a parent tuple written for every created row.
    #[must_use]
    pub fn with_parent_link(mut self, link: ParentLink) -> Self {
        self.parent_links.push(link);
        self
    }

    fn creation_tuples(
        &self,
        ctx: &RequestContext,
        owner_relation: Option<&str>,
        output: &MutationOutput,
    ) -> Vec<RelationshipTuple> {
        let subject = user_subject(ctx.actor_subject().unwrap_or(UNKNOWN_ACTOR));
        let mut tuples = Vec::new();
        for record in output.records() {
            if let Some(relation) = owner_relation {
                tuples.push(RelationshipTuple::new(
                    subject.clone(),
                    relation,
                    object_ref(record.entity_type(), record.id()),
                ));
            }
            tuples.extend(
                self.parent_links
                    .iter()
                    .filter_map(|link| link.tuple_for(record)),
            );
        }
        tuples
    }

    async fn write_created(
        &self,
        ctx: &RequestContext,
        owner_relation: Option<&str>,
        output: &MutationOutput,
    ) -> AppResult<()> {
        let tuples = self.creation_tuples(ctx, owner_relation, output);
        if tuples.is_empty() {
            return Ok(());
        }

        ctx.cancellable(
            "write relationship tuples",
            self.authorization.write_tuples(&tuples),
        )
        .await
        .map_err(|error| match error {
            AppError::Cancelled(_) => error,
            other => AppError::AuthSync(format!(
                "failed to write {} relationship tuple(s): {other}",
                tuples.len()
            )),
        })
    }

    async fn remove_deleted(
        &self,
        ctx: &RequestContext,
        scope: &MutationScope,
        output: &MutationOutput,
    ) {
        // Hard deletes return cascaded dependents of other types as well.
        for record in output.records() {
            let object = object_ref(record.entity_type(), record.id());
            let result = ctx
                .cancellable(
                    "delete relationship tuples",
                    self.authorization.delete_all_object_relations(&object),
                )
                .await;
            let Err(error) = result else {
                continue;
            };

            tracing::error!(
                object = %object,
                error = %error,
                "local delete committed but relationship tuples were not removed"
            );
            if let Some(backlog) = &self.backlog {
                if let Err(backlog_error) =
                    backlog.record_pending(&object, &error.to_string()).await
                {
                    tracing::warn!(
                        object = %object,
                        error = %backlog_error,
                        "failed to record orphaned relationship tuples"
                    );
                }
            }

            scope
                .defer_failure(AppError::Internal(format!(
                    "relationship tuples for '{object}' were not removed: {error}"
                )))
                .await;
        }
    }
}

#[async_trait]
impl MutationHook for TupleSyncHook {
    fn name(&self) -> &'static str {
        "tuple_sync"
    }

    async fn handle(
        &self,
        ctx: &RequestContext,
        mutation: Mutation,
        next: Next<'_>,
    ) -> AppResult<MutationOutput> {
        let op = mutation.op();
        let removes_object =
            op.is_delete() || (op.is_update() && ctx.is_soft_delete_in_progress());
        if op != MutationOp::Create && !removes_object {
            return next.run(ctx, mutation).await;
        }

        let entity_type = mutation.entity_type().clone();
        let owner_relation = next
            .pipeline()
            .schemas()
            .require(&entity_type)?
            .owner_relation()
            .map(str::to_owned);
        let scope = next.scope();

        let output = next.run(ctx, mutation).await?;

        if op == MutationOp::Create {
            self.write_created(ctx, owner_relation.as_deref(), &output)
                .await?;
        } else {
            self.remove_deleted(ctx, scope, &output).await;
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests;
