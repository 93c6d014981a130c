use async_trait::async_trait;
use chrono::Utc;
use warden_core::{AppError, AppResult, PolicyDecision, RequestContext, UNKNOWN_ACTOR};
use warden_domain::{Capability, Mutation, MutationOp, MutationOutput};

use crate::pipeline::{MutationHook, Next};

/// Fills created/updated audit columns from the request actor.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditStampHook {
    exempt_system: bool,
}

impl AuditStampHook {
    /// Creates a stamper that requires an actor for every audited write.
    #[must_use]
    pub fn new() -> Self {
        Self {
            exempt_system: false,
        }
    }

    /// Creates a stamper for bootstrap flows that stamps `unknown` when no actor
    /// is present.
    #[must_use]
    pub fn exempt_system() -> Self {
        Self {
            exempt_system: true,
        }
    }

    fn resolve_actor(&self, ctx: &RequestContext, mutation: &Mutation) -> AppResult<String> {
        if let Some(subject) = ctx.actor_subject() {
            return Ok(subject.to_owned());
        }

        // Trusted system writes and rewritten deletes must not be blocked by a
        // missing actor.
        let trusted = self.exempt_system
            || ctx.is_soft_delete_in_progress()
            || ctx.decision_override() == Some(PolicyDecision::Allow);
        if trusted {
            return Ok(UNKNOWN_ACTOR.to_owned());
        }

        Err(AppError::ActorRequired(format!(
            "{} on entity '{}' requires an actor in the request context",
            mutation.op().as_str(),
            mutation.entity_type()
        )))
    }
}

#[async_trait]
impl MutationHook for AuditStampHook {
    fn name(&self) -> &'static str {
        "audit_stamp"
    }

    fn required_capability(&self) -> Option<Capability> {
        Some(Capability::Audited)
    }

    async fn handle(
        &self,
        ctx: &RequestContext,
        mut mutation: Mutation,
        next: Next<'_>,
    ) -> AppResult<MutationOutput> {
        match mutation.op() {
            MutationOp::Create => {
                let actor = self.resolve_actor(ctx, &mutation)?;
                let now = Utc::now();
                let audit = mutation.audit_mut();
                let created_by = audit.created_by.get_or_insert(actor).clone();
                audit.created_at = Some(now);
                audit.updated_at = Some(now);
                audit.updated_by.get_or_insert(created_by);
            }
            MutationOp::Update | MutationOp::UpdateOne => {
                let actor = self.resolve_actor(ctx, &mutation)?;
                let audit = mutation.audit_mut();
                audit.updated_by.get_or_insert(actor);
                audit.updated_at = Some(Utc::now());
            }
            MutationOp::Delete | MutationOp::DeleteOne => {}
        }

        next.run(ctx, mutation).await
    }
}
