use std::sync::Arc;

use async_trait::async_trait;
use warden_core::{AppResult, PolicyDecision, RequestContext};
use warden_domain::{EntityQuery, EntityType, Mutation, OpMask, object_ref, user_subject};

use super::{MutationRule, QueryRule};
use crate::AuthorizationClient;

/// Denies requests that carry no actor; skips otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyIfNoActor;

impl DenyIfNoActor {
    fn decide(ctx: &RequestContext) -> PolicyDecision {
        if ctx.actor().is_some() {
            PolicyDecision::Skip
        } else {
            PolicyDecision::Deny
        }
    }
}

#[async_trait]
impl MutationRule for DenyIfNoActor {
    fn name(&self) -> &'static str {
        "deny_if_no_actor"
    }

    async fn evaluate(&self, ctx: &RequestContext, _: &Mutation) -> AppResult<PolicyDecision> {
        Ok(Self::decide(ctx))
    }
}

#[async_trait]
impl QueryRule for DenyIfNoActor {
    fn name(&self) -> &'static str {
        "deny_if_no_actor"
    }

    async fn evaluate(&self, ctx: &RequestContext, _: &EntityQuery) -> AppResult<PolicyDecision> {
        Ok(Self::decide(ctx))
    }
}

/// Allows any request that carries an actor.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowIfActor;

impl AllowIfActor {
    fn decide(ctx: &RequestContext) -> PolicyDecision {
        if ctx.actor().is_some() {
            PolicyDecision::Allow
        } else {
            PolicyDecision::Skip
        }
    }
}

#[async_trait]
impl MutationRule for AllowIfActor {
    fn name(&self) -> &'static str {
        "allow_if_actor"
    }

    async fn evaluate(&self, ctx: &RequestContext, _: &Mutation) -> AppResult<PolicyDecision> {
        Ok(Self::decide(ctx))
    }
}

#[async_trait]
impl QueryRule for AllowIfActor {
    fn name(&self) -> &'static str {
        "allow_if_actor"
    }

    async fn evaluate(&self, ctx: &RequestContext, _: &EntityQuery) -> AppResult<PolicyDecision> {
        Ok(Self::decide(ctx))
    }
}

/// Denies unconditionally.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysDeny;

#[async_trait]
impl MutationRule for AlwaysDeny {
    fn name(&self) -> &'static str {
        "always_deny"
    }

    async fn evaluate(&self, _: &RequestContext, _: &Mutation) -> AppResult<PolicyDecision> {
        Ok(PolicyDecision::Deny)
    }
}

#[async_trait]
impl QueryRule for AlwaysDeny {
    fn name(&self) -> &'static str {
        "always_deny"
    }

    async fn evaluate(&self, _: &RequestContext, _: &EntityQuery) -> AppResult<PolicyDecision> {
        Ok(PolicyDecision::Deny)
    }
}

/// Allows the listed operation kinds without further checks.
#[derive(Debug, Clone, Copy)]
pub struct AllowMutationOps(pub OpMask);

#[async_trait]
impl MutationRule for AllowMutationOps {
    fn name(&self) -> &'static str {
        "allow_mutation_ops"
    }

    async fn evaluate(&self, _: &RequestContext, mutation: &Mutation) -> AppResult<PolicyDecision> {
        Ok(if self.0.contains(mutation.op()) {
            PolicyDecision::Allow
        } else {
            PolicyDecision::Skip
        })
    }
}

/// Allows single-row writes when the actor holds `relation` on the target object.
pub struct AllowIfObjectRelation {
    authorization: Arc<dyn AuthorizationClient>,
    relation: String,
    ops: OpMask,
}

impl AllowIfObjectRelation {
    /// Creates the rule for the selected operation kinds.
    #[must_use]
    pub fn new(
        authorization: Arc<dyn AuthorizationClient>,
        relation: impl Into<String>,
        ops: OpMask,
    ) -> Self {
        Self {
            authorization,
            relation: relation.into(),
            ops,
        }
    }
}

#[async_trait]
impl MutationRule for AllowIfObjectRelation {
    fn name(&self) -> &'static str {
        "allow_if_object_relation"
    }

    async fn evaluate(&self, ctx: &RequestContext, mutation: &Mutation) -> AppResult<PolicyDecision> {
        if !self.ops.contains(mutation.op()) {
            return Ok(PolicyDecision::Skip);
        }
        let (Some(actor), Some(id)) = (ctx.actor_subject(), mutation.target_id()) else {
            return Ok(PolicyDecision::Skip);
        };

        let subject = user_subject(actor);
        let object = object_ref(mutation.entity_type(), id);
        let allowed = ctx
            .cancellable(
                "authorization check",
                self.authorization
                    .check(&subject, self.relation.as_str(), &object),
            )
            .await?;

        Ok(if allowed {
            PolicyDecision::Allow
        } else {
            PolicyDecision::Skip
        })
    }
}

/// Allows creates of dependent rows when the actor holds `relation` on the owner
/// referenced by `foreign_key`.
pub struct AllowIfOwnerRelation {
    authorization: Arc<dyn AuthorizationClient>,
    foreign_key: String,
    owner_type: EntityType,
    relation: String,
}

impl AllowIfOwnerRelation {
    /// Creates the rule.
    #[must_use]
    pub fn new(
        authorization: Arc<dyn AuthorizationClient>,
        foreign_key: impl Into<String>,
        owner_type: EntityType,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            authorization,
            foreign_key: foreign_key.into(),
            owner_type,
            relation: relation.into(),
        }
    }
}

#[async_trait]
impl MutationRule for AllowIfOwnerRelation {
    fn name(&self) -> &'static str {
        "allow_if_owner_relation"
    }

    async fn evaluate(&self, ctx: &RequestContext, mutation: &Mutation) -> AppResult<PolicyDecision> {
        if mutation.op() != warden_domain::MutationOp::Create {
            return Ok(PolicyDecision::Skip);
        }
        let Some(actor) = ctx.actor_subject() else {
            return Ok(PolicyDecision::Skip);
        };
        let Some(owner_id) = mutation
            .field(self.foreign_key.as_str())
            .and_then(serde_json::Value::as_str)
        else {
            return Ok(PolicyDecision::Skip);
        };

        let subject = user_subject(actor);
        let object = object_ref(&self.owner_type, owner_id);
        let allowed = ctx
            .cancellable(
                "authorization check",
                self.authorization
                    .check(&subject, self.relation.as_str(), &object),
            )
            .await?;

        Ok(if allowed {
            PolicyDecision::Allow
        } else {
            PolicyDecision::Skip
        })
    }
}
