use async_trait::async_trait;
use chrono::Utc;
use warden_core::{AppError, AppResult, PolicyDecision, RequestContext, UNKNOWN_ACTOR};
use warden_domain::{
    Capability, EntityQuery, EntityType, Mutation, MutationOp, MutationOutput, OwnershipEdge,
    Predicate,
};

use crate::pipeline::{MutationHook, MutationPipeline, MutationScope, Next, QueryInterceptor};

/// Rewrites deletes into updates that stamp `deleted_at` and `deleted_by`.
///
/// Once the owner row is marked, active dependents along cascading ownership
/// edges are deleted through the same pipeline and transaction. Active
/// dependents along restricting edges fail the delete with a constraint error.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftDeleteHook;

fn cascade_context(ctx: &RequestContext) -> RequestContext {
    // System writes on behalf of the original actor.
    ctx.without_soft_delete_in_progress()
        .with_decision_override(PolicyDecision::Allow)
}

fn dependents_query(edge: &OwnershipEdge, owner_id: &str) -> EntityQuery {
    EntityQuery::new(edge.dependent_type().clone())
        .filter(Predicate::field_eq(edge.foreign_key(), owner_id.into()))
}

impl SoftDeleteHook {
    /// Fails when a row about to be deleted still has active dependents along
    /// a restricting edge. Must run before the owner is marked.
    async fn ensure_unrestricted(
        &self,
        ctx: &RequestContext,
        pipeline: &MutationPipeline,
        scope: &MutationScope,
        mutation: &Mutation,
    ) -> AppResult<()> {
        let mutation_type = mutation.entity_type();
        let schema = pipeline.schemas().require(mutation_type)?;
        let restricting: Vec<&OwnershipEdge> =
            schema.edges().iter().filter(|edge| !edge.is_cascade()).collect();
        let Some(selection) = mutation.selection() else {
            return Ok(());
        };
        if restricting.is_empty() {
            return Ok(());
        }

        let lookup_ctx = cascade_context(ctx);
        let owners = pipeline
            .query(
                &lookup_ctx,
                scope,
                selection
                    .into_iter()
                    .fold(EntityQuery::new(mutation_type.clone()), EntityQuery::filter),
            )
            .await?;

        for owner in &owners {
            for edge in &restricting {
                let dependents = pipeline
                    .query(&lookup_ctx, scope, dependents_query(edge, owner.id()))
                    .await?;
                if !dependents.is_empty() {
                    return Err(AppError::Constraint(format!(
                        "{mutation_type} '{}' is still referenced by {} {} row(s)",
                        owner.id(),
                        dependents.len(),
                        edge.dependent_type()
                    )));
                }
            }
        }

        Ok(())
    }

    async fn cascade(
        &self,
        ctx: &RequestContext,
        pipeline: &MutationPipeline,
        scope: &MutationScope,
        mutation_type: &EntityType,
        deleted: &MutationOutput,
    ) -> AppResult<()> {
        let schema = pipeline.schemas().require(mutation_type)?;
        if deleted.affected() == 0 {
            return Ok(());
        }

        let cascade_ctx = cascade_context(ctx);
        for owner_id in deleted.ids() {
            for edge in schema.edges().iter().filter(|edge| edge.is_cascade()) {
                let dependents = pipeline
                    .query(&cascade_ctx, scope, dependents_query(edge, owner_id))
                    .await?;

                for dependent in dependents {
                    tracing::debug!(
                        owner_type = %mutation_type,
                        owner_id,
                        dependent_type = %edge.dependent_type(),
                        dependent_id = dependent.id(),
                        "cascading soft delete"
                    );
                    pipeline
                        .run(
                            &cascade_ctx,
                            scope,
                            Mutation::delete_one(edge.dependent_type().clone(), dependent.id()),
                        )
                        .await?;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl MutationHook for SoftDeleteHook {
    fn name(&self) -> &'static str {
        "soft_delete"
    }

    fn required_capability(&self) -> Option<Capability> {
        Some(Capability::SoftDelete)
    }

    async fn handle(
        &self,
        ctx: &RequestContext,
        mut mutation: Mutation,
        next: Next<'_>,
    ) -> AppResult<MutationOutput> {
        if ctx.is_skip_soft_delete() || !mutation.op().is_delete() {
            return next.run(ctx, mutation).await;
        }

        let rewritten = match mutation.op() {
            MutationOp::DeleteOne => MutationOp::UpdateOne,
            _ => MutationOp::Update,
        };
        mutation.set_op(rewritten);
        mutation.mark_deleted(
            Utc::now(),
            ctx.actor_subject().unwrap_or(UNKNOWN_ACTOR),
        );
        mutation.add_guard(Predicate::DeletedAtIsNull);

        let entity_type = mutation.entity_type().clone();
        let pipeline = next.pipeline();
        let scope = next.scope();
        self.ensure_unrestricted(ctx, pipeline, scope, &mutation)
            .await?;
        let output = next
            .run(&ctx.with_soft_delete_in_progress(), mutation)
            .await?;

        self.cascade(ctx, pipeline, scope, &entity_type, &output)
            .await?;
        Ok(output)
    }
}

/// Hides soft-deleted rows from reads unless the skip flag is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftDeleteFilter;

impl QueryInterceptor for SoftDeleteFilter {
    fn name(&self) -> &'static str {
        "soft_delete_filter"
    }

    fn required_capability(&self) -> Option<Capability> {
        Some(Capability::SoftDelete)
    }

    fn intercept(&self, ctx: &RequestContext, query: &mut EntityQuery) -> AppResult<()> {
        if !ctx.is_skip_soft_delete() {
            query.push_predicate(Predicate::DeletedAtIsNull);
        }
        Ok(())
    }
}
