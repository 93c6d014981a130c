use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use warden_core::{AppResult, NonEmptyString};

/// Stable name of a persisted entity type, e.g. `Organization`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityType(NonEmptyString);

impl EntityType {
    /// Creates a validated entity type name.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        Ok(Self(NonEmptyString::new(value)?))
    }

    /// Returns the type name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the lowercased name used as the authorization object namespace.
    #[must_use]
    pub fn tuple_namespace(&self) -> String {
        self.0.as_str().to_lowercase()
    }
}

impl Display for EntityType {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0.as_str())
    }
}

/// Audit columns attached to every audited entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFields {
    /// First write timestamp.
    pub created_at: Option<DateTime<Utc>>,
    /// First write actor.
    pub created_by: Option<String>,
    /// Latest write timestamp.
    pub updated_at: Option<DateTime<Utc>>,
    /// Latest write actor.
    pub updated_by: Option<String>,
    /// Soft-delete timestamp.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Soft-delete actor.
    pub deleted_by: Option<String>,
}

/// Persisted entity row as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    id: NonEmptyString,
    entity_type: EntityType,
    fields: Map<String, Value>,
    audit: AuditFields,
}

impl EntityRecord {
    /// Creates a record projection.
    pub fn new(
        id: impl Into<String>,
        entity_type: EntityType,
        fields: Map<String, Value>,
        audit: AuditFields,
    ) -> AppResult<Self> {
        Ok(Self {
            id: NonEmptyString::new(id)?,
            entity_type,
            fields,
            audit,
        })
    }

    /// Returns the record identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// Returns the entity type.
    #[must_use]
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// Returns the user-defined field values.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Returns a single field value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns the audit columns.
    #[must_use]
    pub fn audit(&self) -> &AuditFields {
        &self.audit
    }

    /// Returns whether the record was soft-deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.audit.deleted_at.is_some()
    }

    pub(crate) fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }

    /// Returns mutable audit columns for store adapters.
    pub fn audit_mut(&mut self) -> &mut AuditFields {
        &mut self.audit
    }

    /// Consumes the record and returns its parts for store adapters.
    #[must_use]
    pub fn into_parts(self) -> (String, EntityType, Map<String, Value>, AuditFields) {
        (self.id.into(), self.entity_type, self.fields, self.audit)
    }
}
