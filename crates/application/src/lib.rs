//! Application services and ports.

#![forbid(unsafe_code)]

mod audit_stamper;
mod catalog;
mod entity_client;
mod pipeline;
mod pipeline_ports;
mod policy;
mod soft_delete;
#[cfg(test)]
mod test_support;
mod tuple_reconciliation_service;
mod tuple_sync;

pub use audit_stamper::AuditStampHook;
pub use catalog::{
    DefaultOrganizationSettingHook, GROUP, INHERITED_RELATIONS, ORGANIZATION,
    ORGANIZATION_SETTING, PARENT_RELATION, RELATION_IMPLICATIONS, build_default_pipeline,
    default_schemas,
};
pub use entity_client::{EntityClient, Transaction};
pub use pipeline::{HookRegistry, MutationHook, MutationPipeline, MutationScope, Next, QueryInterceptor};
pub use pipeline_ports::{
    AuthorizationClient, EntityStore, PendingTupleCleanup, StoreTransaction, TupleCleanupBacklog,
};
pub use policy::{
    AllowIfActor, AllowIfObjectRelation, AllowIfOwnerRelation, AllowMutationOps, AlwaysDeny,
    DenyIfNoActor, EntityPolicy, MutationRule, PolicyRegistry, QueryRule,
};
pub use soft_delete::{SoftDeleteFilter, SoftDeleteHook};
pub use tuple_reconciliation_service::{ReconciliationReport, TupleReconciliationService};
pub use tuple_sync::{ParentLink, TupleSyncHook};
