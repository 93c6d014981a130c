use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use warden_core::{AppError, AppResult, RequestContext};
use warden_domain::{
    Capability, EntityQuery, EntityRecord, EntitySchema, EntityType, Mutation, MutationOutput,
    OpMask, SchemaRegistry,
};

use crate::StoreTransaction;
use crate::policy::{EntityPolicy, PolicyRegistry};

/// Interceptor wrapped around the store call of a mutation.
///
/// A hook continues the chain by calling [`Next::run`] and short-circuits by
/// returning without calling it.
#[async_trait]
pub trait MutationHook: Send + Sync {
    /// Returns a stable hook name for logs.
    fn name(&self) -> &'static str;

    /// Returns the capability an entity must declare for this hook to apply.
    fn required_capability(&self) -> Option<Capability> {
        None
    }

    /// Handles the mutation.
    async fn handle(
        &self,
        ctx: &RequestContext,
        mutation: Mutation,
        next: Next<'_>,
    ) -> AppResult<MutationOutput>;
}

/// Interceptor that rewrites queries before they reach the store.
pub trait QueryInterceptor: Send + Sync {
    /// Returns a stable interceptor name for logs.
    fn name(&self) -> &'static str;

    /// Returns the capability an entity must declare for this interceptor to apply.
    fn required_capability(&self) -> Option<Capability> {
        None
    }

    /// Rewrites the query.
    fn intercept(&self, ctx: &RequestContext, query: &mut EntityQuery) -> AppResult<()>;
}

/// Transaction and deferred failures of one external operation.
pub struct MutationScope {
    transaction: Arc<dyn StoreTransaction>,
    deferred_failures: Mutex<Vec<AppError>>,
}

impl MutationScope {
    /// Wraps an open store transaction.
    #[must_use]
    pub fn new(transaction: Arc<dyn StoreTransaction>) -> Self {
        Self {
            transaction,
            deferred_failures: Mutex::new(Vec::new()),
        }
    }

    /// Returns the shared store transaction.
    #[must_use]
    pub fn transaction(&self) -> &Arc<dyn StoreTransaction> {
        &self.transaction
    }

    /// Records a failure to report only after the local write is durable.
    pub async fn defer_failure(&self, error: AppError) {
        self.deferred_failures.lock().await.push(error);
    }

    /// Drains deferred failures.
    pub async fn take_deferred_failures(&self) -> Vec<AppError> {
        std::mem::take(&mut *self.deferred_failures.lock().await)
    }
}

#[derive(Clone)]
struct RegisteredHook {
    mask: OpMask,
    hook: Arc<dyn MutationHook>,
}

/// Continuation over the remaining hooks, ending in the store call.
pub struct Next<'a> {
    pipeline: &'a MutationPipeline,
    scope: &'a MutationScope,
    hooks: &'a [RegisteredHook],
}

impl<'a> Next<'a> {
    /// Returns the pipeline, for hooks that issue nested mutations.
    #[must_use]
    pub fn pipeline(&self) -> &'a MutationPipeline {
        self.pipeline
    }

    /// Returns the scope of the enclosing transaction.
    #[must_use]
    pub fn scope(&self) -> &'a MutationScope {
        self.scope
    }

    /// Runs the next matching hook, or the store call once hooks are exhausted.
    ///
    /// Masks are matched against the operation kind at the time each hook is
    /// reached, so a rewritten delete is seen as an update by later hooks.
    pub async fn run(self, ctx: &RequestContext, mutation: Mutation) -> AppResult<MutationOutput> {
        let mut remaining = self.hooks;
        while let Some((registered, rest)) = remaining.split_first() {
            if registered.mask.contains(mutation.op()) {
                let next = Next {
                    pipeline: self.pipeline,
                    scope: self.scope,
                    hooks: rest,
                };
                return registered.hook.handle(ctx, mutation, next).await;
            }
            remaining = rest;
        }

        self.pipeline
            .schemas
            .require(mutation.entity_type())?
            .validate_mutation(&mutation)?;

        self.scope.transaction().mutate(ctx, &mutation).await
    }
}

#[cfg(test)]
impl<'a> Next<'a> {
    /// Continuation that goes straight to the store call.
    pub(crate) fn terminal(pipeline: &'a MutationPipeline, scope: &'a MutationScope) -> Self {
        Self {
            pipeline,
            scope,
            hooks: &[],
        }
    }
}

/// Builder for the per-type policy, hook and interceptor chains.
pub struct HookRegistry {
    schemas: Arc<SchemaRegistry>,
    policies: PolicyRegistry,
    hooks: HashMap<EntityType, Vec<RegisteredHook>>,
    interceptors: HashMap<EntityType, Vec<Arc<dyn QueryInterceptor>>>,
}

impl HookRegistry {
    /// Starts an empty registry over the schemas.
    #[must_use]
    pub fn new(schemas: Arc<SchemaRegistry>) -> Self {
        Self {
            schemas,
            policies: PolicyRegistry::new(),
            hooks: HashMap::new(),
            interceptors: HashMap::new(),
        }
    }

    /// Sets the privacy policy of an entity type.
    pub fn register_policy(
        &mut self,
        entity_type: &EntityType,
        policy: EntityPolicy,
    ) -> AppResult<()> {
        self.schemas.require(entity_type)?;
        self.policies.register(entity_type.clone(), policy);
        Ok(())
    }

    /// Appends a hook to the chain of an entity type for the selected operations.
    ///
    /// Fails when the entity lacks the capability the hook needs.
    pub fn register_hook(
        &mut self,
        entity_type: &EntityType,
        mask: OpMask,
        hook: Arc<dyn MutationHook>,
    ) -> AppResult<()> {
        let schema = self.schemas.require(entity_type)?;
        ensure_capability(schema, hook.required_capability(), hook.name())?;

        self.hooks
            .entry(entity_type.clone())
            .or_default()
            .push(RegisteredHook { mask, hook });
        Ok(())
    }

    /// Appends a query interceptor for an entity type.
    pub fn register_interceptor(
        &mut self,
        entity_type: &EntityType,
        interceptor: Arc<dyn QueryInterceptor>,
    ) -> AppResult<()> {
        let schema = self.schemas.require(entity_type)?;
        ensure_capability(schema, interceptor.required_capability(), interceptor.name())?;

        self.interceptors
            .entry(entity_type.clone())
            .or_default()
            .push(interceptor);
        Ok(())
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> MutationPipeline {
        MutationPipeline {
            schemas: self.schemas,
            policies: self.policies,
            hooks: self.hooks,
            interceptors: self.interceptors,
        }
    }
}

fn ensure_capability(
    schema: &EntitySchema,
    capability: Option<Capability>,
    component: &str,
) -> AppResult<()> {
    let Some(capability) = capability else {
        return Ok(());
    };
    if schema.has_capability(capability) {
        return Ok(());
    }

    let message = format!(
        "'{component}' requires capability '{}' but entity '{}' does not declare it",
        capability.as_str(),
        schema.entity_type()
    );
    Err(match capability {
        Capability::Audited => AppError::UnexpectedAuditType(message),
        Capability::SoftDelete => AppError::UnexpectedMutationType(message),
    })
}

/// Frozen policy, hook and interceptor chains for every entity type.
pub struct MutationPipeline {
    schemas: Arc<SchemaRegistry>,
    policies: PolicyRegistry,
    hooks: HashMap<EntityType, Vec<RegisteredHook>>,
    interceptors: HashMap<EntityType, Vec<Arc<dyn QueryInterceptor>>>,
}

impl MutationPipeline {
    /// Returns the schema registry.
    #[must_use]
    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Runs policy, hooks and the store call for one mutation inside the scope.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        scope: &MutationScope,
        mutation: Mutation,
    ) -> AppResult<MutationOutput> {
        if mutation.is_marked_deleted() {
            return Err(AppError::Validation(
                "deleted_at and deleted_by are set by soft delete only".to_owned(),
            ));
        }
        if ctx.is_cancelled() {
            return Err(AppError::Cancelled(format!(
                "{} on '{}' was not started because the request was cancelled",
                mutation.op().as_str(),
                mutation.entity_type()
            )));
        }

        self.schemas.require(mutation.entity_type())?;
        self.policies.authorize_mutation(ctx, &mutation).await?;

        let hooks = self
            .hooks
            .get(mutation.entity_type())
            .map(Vec::as_slice)
            .unwrap_or_default();
        let next = Next {
            pipeline: self,
            scope,
            hooks,
        };

        next.run(ctx, mutation).await
    }

    /// Runs query policy and interceptors, then reads from the scope's transaction.
    pub async fn query(
        &self,
        ctx: &RequestContext,
        scope: &MutationScope,
        mut query: EntityQuery,
    ) -> AppResult<Vec<EntityRecord>> {
        self.schemas.require(query.entity_type())?;
        self.policies.authorize_query(ctx, &query).await?;

        if let Some(interceptors) = self.interceptors.get(query.entity_type()) {
            for interceptor in interceptors {
                interceptor.intercept(ctx, &mut query)?;
            }
        }

        scope.transaction().query(ctx, &query).await
    }
}
