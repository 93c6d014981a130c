use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use warden_core::{AppResult, PolicyDecision, RequestContext};
use warden_domain::{
    Capability, EntitySchema, EntityType, FieldDefinition, Mutation, MutationOutput, OpMask,
    OwnershipEdge, SchemaRegistry,
};

use crate::audit_stamper::AuditStampHook;
use crate::pipeline::{HookRegistry, MutationHook, MutationPipeline, Next};
use crate::policy::{
    AllowIfActor, AllowIfObjectRelation, AllowIfOwnerRelation, AllowMutationOps, EntityPolicy,
};
use crate::soft_delete::{SoftDeleteFilter, SoftDeleteHook};
use crate::tuple_sync::{ParentLink, TupleSyncHook};
use crate::{AuthorizationClient, TupleCleanupBacklog};

/// Tenant root entity.
pub const ORGANIZATION: &str = "Organization";
/// Group owned by an organization.
pub const GROUP: &str = "Group";
/// Single settings row owned by an organization.
pub const ORGANIZATION_SETTING: &str = "OrganizationSetting";

/// Relation linking a child object to the organization it belongs to.
pub const PARENT_RELATION: &str = "parent";

/// Relations implied by a directly granted relation.
pub const RELATION_IMPLICATIONS: &[(&str, &[&str])] = &[
    ("owner", &["member", "can_edit", "can_delete"]),
    ("admin", &["member", "can_edit", "can_delete"]),
];

/// Relations a child inherits from its parent through [`PARENT_RELATION`].
pub const INHERITED_RELATIONS: &[&str] = &["can_edit", "can_delete"];

const OWNER_FOREIGN_KEY: &str = "owner_id";

fn entity_type(name: &str) -> AppResult<EntityType> {
    EntityType::new(name)
}

/// Returns the schemas of the organization catalog.
pub fn default_schemas() -> AppResult<SchemaRegistry> {
    let organization = entity_type(ORGANIZATION)?;
    let group = entity_type(GROUP)?;
    let setting = entity_type(ORGANIZATION_SETTING)?;

    let mut registry = SchemaRegistry::new();
    registry.register(
        EntitySchema::new(organization)
            .with_field(FieldDefinition::new("name").required().unique())
            .with_field(FieldDefinition::new("display_name"))
            .with_field(FieldDefinition::new("description"))
            .with_capability(Capability::Audited)
            .with_capability(Capability::SoftDelete)
            .with_edge(OwnershipEdge::cascading(group.clone(), OWNER_FOREIGN_KEY))
            .with_edge(OwnershipEdge::cascading(setting.clone(), OWNER_FOREIGN_KEY))
            .with_owner_relation("owner"),
    )?;
    registry.register(
        EntitySchema::new(group)
            .with_field(FieldDefinition::new(OWNER_FOREIGN_KEY).required())
            .with_field(FieldDefinition::new("name").required())
            .with_field(FieldDefinition::new("description"))
            .with_capability(Capability::Audited)
            .with_capability(Capability::SoftDelete)
            .with_owner_relation("admin"),
    )?;
    registry.register(
        EntitySchema::new(setting)
            .with_field(FieldDefinition::new(OWNER_FOREIGN_KEY).required().unique())
            .with_field(FieldDefinition::new("billing_email"))
            .with_field(FieldDefinition::new("domains"))
            .with_capability(Capability::Audited)
            .with_capability(Capability::SoftDelete),
    )?;

    Ok(registry)
}

/// Inserts the settings row of every new organization in the same transaction.
pub struct DefaultOrganizationSettingHook {
    setting_type: EntityType,
}

impl DefaultOrganizationSettingHook {
    /// Creates the hook.
    pub fn new() -> AppResult<Self> {
        Ok(Self {
            setting_type: entity_type(ORGANIZATION_SETTING)?,
        })
    }
}

#[async_trait]
impl MutationHook for DefaultOrganizationSettingHook {
    fn name(&self) -> &'static str {
        "default_organization_setting"
    }

    async fn handle(
        &self,
        ctx: &RequestContext,
        mutation: Mutation,
        next: Next<'_>,
    ) -> AppResult<MutationOutput> {
        let pipeline = next.pipeline();
        let scope = next.scope();
        let output = next.run(ctx, mutation).await?;

        // The settings row is system-created on behalf of the same actor.
        let system_ctx = ctx.with_decision_override(PolicyDecision::Allow);
        for organization_id in output.ids() {
            let setting = Mutation::create(self.setting_type.clone())
                .with_field(OWNER_FOREIGN_KEY, json!(organization_id))?
                .with_field("domains", json!([]))?;
            pipeline.run(&system_ctx, scope, setting).await?;
        }

        Ok(output)
    }
}

/// Wires policies, hooks and interceptors for the organization catalog.
///
/// Hooks run as soft delete, audit stamping, default settings and tuple sync,
/// so the tuple synchronizer sees rewritten deletes with their flag set.
pub fn build_default_pipeline(
    schemas: Arc<SchemaRegistry>,
    authorization: Arc<dyn AuthorizationClient>,
    backlog: Option<Arc<dyn TupleCleanupBacklog>>,
) -> AppResult<MutationPipeline> {
    let organization = entity_type(ORGANIZATION)?;
    let group = entity_type(GROUP)?;
    let setting = entity_type(ORGANIZATION_SETTING)?;

    let mut registry = HookRegistry::new(schemas);

    registry.register_policy(
        &organization,
        EntityPolicy::new()
            .with_mutation_rule(AllowMutationOps(OpMask::CREATE))
            .with_mutation_rule(AllowIfObjectRelation::new(
                authorization.clone(),
                "can_edit",
                OpMask::UPDATE_ANY,
            ))
            .with_mutation_rule(AllowIfObjectRelation::new(
                authorization.clone(),
                "can_delete",
                OpMask::DELETE_ANY,
            ))
            .with_query_rule(AllowIfActor),
    )?;
    registry.register_policy(
        &group,
        EntityPolicy::new()
            .with_mutation_rule(AllowIfOwnerRelation::new(
                authorization.clone(),
                OWNER_FOREIGN_KEY,
                organization.clone(),
                "member",
            ))
            .with_mutation_rule(AllowIfObjectRelation::new(
                authorization.clone(),
                "can_edit",
                OpMask::UPDATE_ANY,
            ))
            .with_mutation_rule(AllowIfObjectRelation::new(
                authorization.clone(),
                "can_delete",
                OpMask::DELETE_ANY,
            ))
            .with_query_rule(AllowIfActor),
    )?;
    registry.register_policy(
        &setting,
        EntityPolicy::new()
            .with_mutation_rule(AllowIfOwnerRelation::new(
                authorization.clone(),
                OWNER_FOREIGN_KEY,
                organization.clone(),
                "can_edit",
            ))
            .with_mutation_rule(AllowIfObjectRelation::new(
                authorization.clone(),
                "can_edit",
                OpMask::UPDATE_ANY,
            ))
            .with_mutation_rule(AllowIfObjectRelation::new(
                authorization.clone(),
                "can_delete",
                OpMask::DELETE_ANY,
            ))
            .with_query_rule(AllowIfActor),
    )?;

    let tuple_sync = |parent_link: Option<ParentLink>| {
        let mut hook = TupleSyncHook::new(authorization.clone());
        if let Some(backlog) = &backlog {
            hook = hook.with_backlog(backlog.clone());
        }
        if let Some(link) = parent_link {
            hook = hook.with_parent_link(link);
        }
        Arc::new(hook)
    };
    let organization_sync = tuple_sync(None);
    let child_sync = tuple_sync(Some(ParentLink::new(
        OWNER_FOREIGN_KEY,
        organization.clone(),
        PARENT_RELATION,
    )));

    let audit = Arc::new(AuditStampHook::new());
    let stamped_ops = OpMask::CREATE.union(OpMask::UPDATE_ANY);
    for entity_type in [&organization, &group, &setting] {
        registry.register_hook(entity_type, OpMask::DELETE_ANY, Arc::new(SoftDeleteHook))?;
        registry.register_hook(entity_type, stamped_ops, audit.clone())?;
        if entity_type == &organization {
            registry.register_hook(
                entity_type,
                OpMask::CREATE,
                Arc::new(DefaultOrganizationSettingHook::new()?),
            )?;
            registry.register_hook(entity_type, OpMask::ALL, organization_sync.clone())?;
        } else {
            registry.register_hook(entity_type, OpMask::ALL, child_sync.clone())?;
        }
        registry.register_interceptor(entity_type, Arc::new(SoftDeleteFilter))?;
    }

    Ok(registry.build())
}
