//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod entity;
mod mutation;
mod query;
mod schema;
mod tuple;

pub use entity::{AuditFields, EntityRecord, EntityType};
pub use mutation::{
    AuditAssignments, Mutation, MutationOp, MutationOutput, MutationTarget, OpMask,
    RESERVED_FIELDS,
};
pub use query::{EntityQuery, Predicate};
pub use schema::{Capability, EntitySchema, FieldDefinition, OwnershipEdge, SchemaRegistry};
pub use tuple::{RelationshipTuple, object_ref, user_subject};
