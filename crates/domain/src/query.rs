use serde_json::Value;

use crate::entity::{EntityRecord, EntityType};

/// Row predicate understood by every store adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Row identifier equals the value.
    IdEq(String),
    /// User field equals the JSON value exactly.
    FieldEq {
        /// Field name.
        field: String,
        /// Expected value.
        value: Value,
    },
    /// Row has not been soft-deleted.
    DeletedAtIsNull,
}

impl Predicate {
    /// Builds a field equality predicate.
    #[must_use]
    pub fn field_eq(field: impl Into<String>, value: Value) -> Self {
        Self::FieldEq {
            field: field.into(),
            value,
        }
    }

    /// Evaluates the predicate against a materialized row.
    #[must_use]
    pub fn matches(&self, record: &EntityRecord) -> bool {
        match self {
            Self::IdEq(id) => record.id() == id,
            Self::FieldEq { field, value } => record.field(field) == Some(value),
            Self::DeletedAtIsNull => !record.is_deleted(),
        }
    }
}

/// Read request for one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityQuery {
    entity_type: EntityType,
    predicates: Vec<Predicate>,
    limit: Option<usize>,
}

impl EntityQuery {
    /// Starts an unfiltered query.
    #[must_use]
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            predicates: Vec::new(),
            limit: None,
        }
    }

    /// Starts a query for one row by identifier.
    #[must_use]
    pub fn by_id(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self::new(entity_type).filter(Predicate::IdEq(id.into()))
    }

    /// Adds a predicate; all predicates combine with logical AND.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.push_predicate(predicate);
        self
    }

    /// Caps the number of returned rows.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Adds a predicate unless an identical one is present.
    pub fn push_predicate(&mut self, predicate: Predicate) {
        if !self.predicates.contains(&predicate) {
            self.predicates.push(predicate);
        }
    }

    /// Returns the queried entity type.
    #[must_use]
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// Returns the predicates.
    #[must_use]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Returns the row cap.
    #[must_use]
    pub fn row_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Returns whether a materialized row satisfies every predicate.
    #[must_use]
    pub fn matches(&self, record: &EntityRecord) -> bool {
        record.entity_type() == &self.entity_type
            && self
                .predicates
                .iter()
                .all(|predicate| predicate.matches(record))
    }
}
