use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_core::{AppError, AppResult};

use crate::entity::{AuditFields, EntityRecord, EntityType};
use crate::query::Predicate;

/// Field names owned by the store and the audit/soft-delete hooks.
pub const RESERVED_FIELDS: &[&str] = &[
    "id",
    "created_at",
    "created_by",
    "updated_at",
    "updated_by",
    "deleted_at",
    "deleted_by",
];

/// Kind of write applied to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOp {
    /// Inserts one row.
    Create,
    /// Updates every row matching a filter.
    Update,
    /// Updates one row by identifier.
    UpdateOne,
    /// Deletes every row matching a filter.
    Delete,
    /// Deletes one row by identifier.
    DeleteOne,
}

impl MutationOp {
    /// Returns the policy action label for this operation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::UpdateOne => "update_one",
            Self::Delete => "delete",
            Self::DeleteOne => "delete_one",
        }
    }

    /// Returns whether the operation removes rows.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete | Self::DeleteOne)
    }

    /// Returns whether the operation changes existing rows in place.
    #[must_use]
    pub fn is_update(&self) -> bool {
        matches!(self, Self::Update | Self::UpdateOne)
    }

    fn bit(self) -> u8 {
        match self {
            Self::Create => 1,
            Self::Update => 1 << 1,
            Self::UpdateOne => 1 << 2,
            Self::Delete => 1 << 3,
            Self::DeleteOne => 1 << 4,
        }
    }
}

/// Set of operation kinds a hook applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpMask(u8);

impl OpMask {
    /// Matches nothing.
    pub const NONE: Self = Self(0);
    /// Matches `Create`.
    pub const CREATE: Self = Self(1);
    /// Matches `Update` and `UpdateOne`.
    pub const UPDATE_ANY: Self = Self((1 << 1) | (1 << 2));
    /// Matches `Delete` and `DeleteOne`.
    pub const DELETE_ANY: Self = Self((1 << 3) | (1 << 4));
    /// Matches every operation kind.
    pub const ALL: Self = Self(0b1_1111);

    /// Creates a mask for the listed operations.
    #[must_use]
    pub fn of(ops: &[MutationOp]) -> Self {
        Self(ops.iter().fold(0, |bits, op| bits | op.bit()))
    }

    /// Returns the union of both masks.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns whether the operation is selected.
    #[must_use]
    pub fn contains(&self, op: MutationOp) -> bool {
        self.0 & op.bit() != 0
    }
}

/// Rows a mutation applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationTarget {
    /// Create has no existing target.
    New,
    /// One row by identifier.
    Id(String),
    /// Every row matching all predicates.
    Filter(Vec<Predicate>),
}

/// Audit column values staged on an in-flight mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditAssignments {
    /// Creation timestamp.
    pub created_at: Option<DateTime<Utc>>,
    /// Creating actor.
    pub created_by: Option<String>,
    /// Update timestamp.
    pub updated_at: Option<DateTime<Utc>>,
    /// Updating actor.
    pub updated_by: Option<String>,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<String>,
}

impl AuditAssignments {
    /// Returns the staged soft-delete timestamp.
    #[must_use]
    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    /// Returns the staged soft-delete actor.
    #[must_use]
    pub fn deleted_by(&self) -> Option<&str> {
        self.deleted_by.as_deref()
    }
}

/// In-flight write owned by one pipeline invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    op: MutationOp,
    entity_type: EntityType,
    target: MutationTarget,
    guards: Vec<Predicate>,
    fields: BTreeMap<String, Value>,
    audit: AuditAssignments,
}

impl Mutation {
    fn new(op: MutationOp, entity_type: EntityType, target: MutationTarget) -> Self {
        Self {
            op,
            entity_type,
            target,
            guards: Vec::new(),
            fields: BTreeMap::new(),
            audit: AuditAssignments::default(),
        }
    }

    /// Starts a create mutation.
    #[must_use]
    pub fn create(entity_type: EntityType) -> Self {
        Self::new(MutationOp::Create, entity_type, MutationTarget::New)
    }

    /// Starts an update of one row.
    #[must_use]
    pub fn update_one(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self::new(
            MutationOp::UpdateOne,
            entity_type,
            MutationTarget::Id(id.into()),
        )
    }

    /// Starts an update of every row matching the predicates.
    #[must_use]
    pub fn update_where(entity_type: EntityType, predicates: Vec<Predicate>) -> Self {
        Self::new(
            MutationOp::Update,
            entity_type,
            MutationTarget::Filter(predicates),
        )
    }

    /// Starts a delete of one row.
    #[must_use]
    pub fn delete_one(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self::new(
            MutationOp::DeleteOne,
            entity_type,
            MutationTarget::Id(id.into()),
        )
    }

    /// Starts a delete of every row matching the predicates.
    #[must_use]
    pub fn delete_where(entity_type: EntityType, predicates: Vec<Predicate>) -> Self {
        Self::new(
            MutationOp::Delete,
            entity_type,
            MutationTarget::Filter(predicates),
        )
    }

    /// Adds a field assignment, builder style.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> AppResult<Self> {
        self.set_field(name, value)?;
        Ok(self)
    }

    /// Adds a field assignment. Audit and identifier columns are rejected.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) -> AppResult<()> {
        let name = name.into();
        if RESERVED_FIELDS.contains(&name.as_str()) {
            return Err(AppError::Validation(format!(
                "field '{name}' is managed by the mutation pipeline and cannot be assigned"
            )));
        }

        self.fields.insert(name, value);
        Ok(())
    }

    /// Returns the current operation kind.
    #[must_use]
    pub fn op(&self) -> MutationOp {
        self.op
    }

    /// Rewrites the operation kind.
    pub fn set_op(&mut self, op: MutationOp) {
        self.op = op;
    }

    /// Returns the target entity type.
    #[must_use]
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// Returns the rows this mutation targets.
    #[must_use]
    pub fn target(&self) -> &MutationTarget {
        &self.target
    }

    /// Returns the target identifier for single-row operations.
    #[must_use]
    pub fn target_id(&self) -> Option<&str> {
        match &self.target {
            MutationTarget::Id(id) => Some(id.as_str()),
            MutationTarget::New | MutationTarget::Filter(_) => None,
        }
    }

    /// Returns extra predicates every targeted row must also satisfy.
    #[must_use]
    pub fn guards(&self) -> &[Predicate] {
        &self.guards
    }

    /// Narrows the targeted rows with another predicate.
    pub fn add_guard(&mut self, predicate: Predicate) {
        if !self.guards.contains(&predicate) {
            self.guards.push(predicate);
        }
    }

    /// Returns the staged field assignments.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Returns a staged field value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns the staged audit columns.
    #[must_use]
    pub fn audit(&self) -> &AuditAssignments {
        &self.audit
    }

    /// Returns the staged audit columns for stamping.
    pub fn audit_mut(&mut self) -> &mut AuditAssignments {
        &mut self.audit
    }

    /// Stages soft-delete columns. Only the soft-delete hook calls this.
    pub fn mark_deleted(&mut self, deleted_at: DateTime<Utc>, deleted_by: impl Into<String>) {
        self.audit.deleted_at = Some(deleted_at);
        self.audit.deleted_by = Some(deleted_by.into());
    }

    /// Returns whether soft-delete columns are staged.
    #[must_use]
    pub fn is_marked_deleted(&self) -> bool {
        self.audit.deleted_at.is_some() || self.audit.deleted_by.is_some()
    }

    /// Returns the predicates selecting existing rows: the target plus guards.
    ///
    /// Create selects nothing and returns `None`.
    #[must_use]
    pub fn selection(&self) -> Option<Vec<Predicate>> {
        let mut predicates = match &self.target {
            MutationTarget::New => return None,
            MutationTarget::Id(id) => vec![Predicate::IdEq(id.clone())],
            MutationTarget::Filter(predicates) => predicates.clone(),
        };
        predicates.extend(self.guards.iter().cloned());
        Some(predicates)
    }

    /// Returns whether an existing row is selected by the target and guards.
    #[must_use]
    pub fn selects(&self, record: &EntityRecord) -> bool {
        record.entity_type() == &self.entity_type
            && self.selection().is_some_and(|predicates| {
                predicates.iter().all(|predicate| predicate.matches(record))
            })
    }

    /// Builds the row a create mutation inserts under the store-assigned id.
    pub fn to_new_record(&self, id: impl Into<String>) -> AppResult<EntityRecord> {
        if self.op != MutationOp::Create {
            return Err(AppError::Internal(format!(
                "cannot build a new record from a {} mutation",
                self.op.as_str()
            )));
        }

        let fields = self
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let audit = AuditFields {
            created_at: self.audit.created_at,
            created_by: self.audit.created_by.clone(),
            updated_at: self.audit.updated_at,
            updated_by: self.audit.updated_by.clone(),
            deleted_at: None,
            deleted_by: None,
        };
        EntityRecord::new(id, self.entity_type.clone(), fields, audit)
    }

    /// Applies field and audit assignments of an update to an existing row.
    ///
    /// Creation columns are never rewritten.
    pub fn apply_update(&self, record: &mut EntityRecord) {
        for (name, value) in &self.fields {
            record.fields_mut().insert(name.clone(), value.clone());
        }

        let audit = record.audit_mut();
        if let Some(updated_at) = self.audit.updated_at {
            audit.updated_at = Some(updated_at);
        }
        if let Some(updated_by) = &self.audit.updated_by {
            audit.updated_by = Some(updated_by.clone());
        }
        if let Some(deleted_at) = self.audit.deleted_at {
            audit.deleted_at = Some(deleted_at);
        }
        if let Some(deleted_by) = &self.audit.deleted_by {
            audit.deleted_by = Some(deleted_by.clone());
        }
    }
}

/// Rows affected by a successful mutation, in their post-write state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationOutput {
    records: Vec<EntityRecord>,
}

impl MutationOutput {
    /// Wraps affected rows.
    #[must_use]
    pub fn new(records: Vec<EntityRecord>) -> Self {
        Self { records }
    }

    /// Returns the affected rows.
    #[must_use]
    pub fn records(&self) -> &[EntityRecord] {
        &self.records
    }

    /// Returns the number of affected rows.
    #[must_use]
    pub fn affected(&self) -> usize {
        self.records.len()
    }

    /// Returns the identifiers of affected rows.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(EntityRecord::id)
    }

    /// Returns the single affected row of a one-row mutation.
    pub fn into_single(self) -> AppResult<EntityRecord> {
        self.records
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound("mutation affected no rows".to_owned()))
    }
}
