use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use warden_core::{AppError, AppResult, PolicyDecision, RequestContext};
use warden_domain::{EntityQuery, EntityType, Mutation};

mod rules;

pub use rules::{
    AllowIfActor, AllowIfObjectRelation, AllowIfOwnerRelation, AllowMutationOps, AlwaysDeny,
    DenyIfNoActor,
};

/// Privacy rule evaluated before a mutation reaches any hook.
#[async_trait]
pub trait MutationRule: Send + Sync {
    /// Returns a stable rule name for logs.
    fn name(&self) -> &'static str;

    /// Decides the mutation, or returns `Skip` to defer to the next rule.
    async fn evaluate(&self, ctx: &RequestContext, mutation: &Mutation)
    -> AppResult<PolicyDecision>;
}

/// Privacy rule evaluated before a query reaches the store.
#[async_trait]
pub trait QueryRule: Send + Sync {
    /// Returns a stable rule name for logs.
    fn name(&self) -> &'static str;

    /// Decides the query, or returns `Skip` to defer to the next rule.
    async fn evaluate(&self, ctx: &RequestContext, query: &EntityQuery)
    -> AppResult<PolicyDecision>;
}

/// Ordered query and mutation rules for one entity type.
///
/// Both lists always start with [`DenyIfNoActor`], so anonymous requests are
/// rejected before any data-dependent rule runs.
#[derive(Clone)]
pub struct EntityPolicy {
    query_rules: Vec<Arc<dyn QueryRule>>,
    mutation_rules: Vec<Arc<dyn MutationRule>>,
}

impl Default for EntityPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityPolicy {
    /// Creates a policy whose lists hold only the anonymous-request guard.
    #[must_use]
    pub fn new() -> Self {
        Self {
            query_rules: vec![Arc::new(DenyIfNoActor)],
            mutation_rules: vec![Arc::new(DenyIfNoActor)],
        }
    }

    /// Appends a query rule.
    #[must_use]
    pub fn with_query_rule(mut self, rule: impl QueryRule + 'static) -> Self {
        self.query_rules.push(Arc::new(rule));
        self
    }

    /// Appends a mutation rule.
    #[must_use]
    pub fn with_mutation_rule(mut self, rule: impl MutationRule + 'static) -> Self {
        self.mutation_rules.push(Arc::new(rule));
        self
    }

    /// Resolves the final decision for a mutation.
    pub async fn evaluate_mutation(
        &self,
        ctx: &RequestContext,
        mutation: &Mutation,
    ) -> AppResult<PolicyDecision> {
        if let Some(decision) = ctx.decision_override() {
            return Ok(decision);
        }

        for rule in &self.mutation_rules {
            let decision = rule.evaluate(ctx, mutation).await?;
            if decision != PolicyDecision::Skip {
                tracing::debug!(
                    rule = rule.name(),
                    decision = decision.as_str(),
                    entity_type = %mutation.entity_type(),
                    op = mutation.op().as_str(),
                    "mutation policy decided"
                );
                return Ok(decision);
            }
        }

        Ok(PolicyDecision::Deny)
    }

    /// Resolves the final decision for a query.
    pub async fn evaluate_query(
        &self,
        ctx: &RequestContext,
        query: &EntityQuery,
    ) -> AppResult<PolicyDecision> {
        if let Some(decision) = ctx.decision_override() {
            return Ok(decision);
        }

        for rule in &self.query_rules {
            let decision = rule.evaluate(ctx, query).await?;
            if decision != PolicyDecision::Skip {
                return Ok(decision);
            }
        }

        Ok(PolicyDecision::Deny)
    }
}

/// Entity policies keyed by type. Types without a policy are denied.
#[derive(Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<EntityType, EntityPolicy>,
}

impl PolicyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the policy for an entity type, replacing any previous one.
    pub fn register(&mut self, entity_type: EntityType, policy: EntityPolicy) {
        self.policies.insert(entity_type, policy);
    }

    /// Fails with `PermissionDenied` unless the mutation is allowed.
    pub async fn authorize_mutation(
        &self,
        ctx: &RequestContext,
        mutation: &Mutation,
    ) -> AppResult<()> {
        let decision = match self.policies.get(mutation.entity_type()) {
            Some(policy) => policy.evaluate_mutation(ctx, mutation).await?,
            None => ctx.decision_override().unwrap_or(PolicyDecision::Deny),
        };

        match decision {
            PolicyDecision::Allow => Ok(()),
            PolicyDecision::Deny | PolicyDecision::Skip => Err(AppError::permission_denied(
                mutation.op().as_str(),
                mutation.entity_type().as_str(),
            )),
        }
    }

    /// Fails with `PermissionDenied` unless the query is allowed.
    pub async fn authorize_query(&self, ctx: &RequestContext, query: &EntityQuery) -> AppResult<()> {
        let decision = match self.policies.get(query.entity_type()) {
            Some(policy) => policy.evaluate_query(ctx, query).await?,
            None => ctx.decision_override().unwrap_or(PolicyDecision::Deny),
        };

        match decision {
            PolicyDecision::Allow => Ok(()),
            PolicyDecision::Deny | PolicyDecision::Skip => Err(AppError::permission_denied(
                "query",
                query.entity_type().as_str(),
            )),
        }
    }
}
