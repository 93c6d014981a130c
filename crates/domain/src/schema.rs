use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use warden_core::{AppError, AppResult};

use crate::entity::EntityType;
use crate::mutation::{Mutation, MutationOp};

/// Optional behavior an entity type opts into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Carries created/updated audit columns.
    Audited,
    /// Carries deleted_at/deleted_by and is never hard-deleted by API callers.
    SoftDelete,
}

impl Capability {
    /// Returns a stable label for diagnostics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audited => "audited",
            Self::SoftDelete => "soft_delete",
        }
    }
}

/// User-defined column of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    name: String,
    required: bool,
    unique: bool,
}

impl FieldDefinition {
    /// Creates an optional, non-unique field.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            unique: false,
        }
    }

    /// Marks the field as required on create.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the field as unique among rows of the type.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Returns the field name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns whether create must assign the field.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Returns whether values must be unique.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.unique
    }
}

/// Owner-to-dependent edge: dependents store the owner id in `foreign_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipEdge {
    dependent_type: EntityType,
    foreign_key: String,
    cascade: bool,
}

impl OwnershipEdge {
    /// Creates a cascading edge.
    #[must_use]
    pub fn cascading(dependent_type: EntityType, foreign_key: impl Into<String>) -> Self {
        Self {
            dependent_type,
            foreign_key: foreign_key.into(),
            cascade: true,
        }
    }

    /// Creates an edge that leaves dependents in place when the owner is deleted.
    #[must_use]
    pub fn restricting(dependent_type: EntityType, foreign_key: impl Into<String>) -> Self {
        Self {
            dependent_type,
            foreign_key: foreign_key.into(),
            cascade: false,
        }
    }

    /// Returns the dependent entity type.
    #[must_use]
    pub fn dependent_type(&self) -> &EntityType {
        &self.dependent_type
    }

    /// Returns the dependent field holding the owner id.
    #[must_use]
    pub fn foreign_key(&self) -> &str {
        self.foreign_key.as_str()
    }

    /// Returns whether owner deletion propagates to dependents.
    #[must_use]
    pub fn is_cascade(&self) -> bool {
        self.cascade
    }
}

/// Declared shape and capabilities of one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    entity_type: EntityType,
    fields: Vec<FieldDefinition>,
    capabilities: BTreeSet<Capability>,
    edges: Vec<OwnershipEdge>,
    owner_relation: Option<String>,
}

impl EntitySchema {
    /// Starts a schema without fields or capabilities.
    #[must_use]
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            fields: Vec::new(),
            capabilities: BTreeSet::new(),
            edges: Vec::new(),
            owner_relation: None,
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a capability.
    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// Adds an ownership edge to a dependent type.
    #[must_use]
    pub fn with_edge(mut self, edge: OwnershipEdge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Sets the relation granted to the creating user in the authorization store.
    #[must_use]
    pub fn with_owner_relation(mut self, relation: impl Into<String>) -> Self {
        self.owner_relation = Some(relation.into());
        self
    }

    /// Returns the entity type.
    #[must_use]
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// Returns the declared fields.
    #[must_use]
    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    /// Returns a declared field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|field| field.name() == name)
    }

    /// Returns whether the capability is declared.
    #[must_use]
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Returns every outgoing ownership edge.
    #[must_use]
    pub fn edges(&self) -> &[OwnershipEdge] {
        &self.edges
    }

    /// Returns the edges whose dependents follow the owner on delete.
    pub fn cascade_edges(&self) -> impl Iterator<Item = &OwnershipEdge> {
        self.edges.iter().filter(|edge| edge.is_cascade())
    }

    /// Returns the creator relation, if tuples are synchronized for this type.
    #[must_use]
    pub fn owner_relation(&self) -> Option<&str> {
        self.owner_relation.as_deref()
    }

    /// Checks that a mutation only assigns declared fields and that creates carry
    /// every required field.
    pub fn validate_mutation(&self, mutation: &Mutation) -> AppResult<()> {
        if let Some(unknown) = mutation
            .fields()
            .keys()
            .find(|name| self.field(name).is_none())
        {
            return Err(AppError::Validation(format!(
                "field '{unknown}' is not defined on entity '{}'",
                self.entity_type
            )));
        }

        if mutation.op() == MutationOp::Create {
            if let Some(missing) = self.fields.iter().find(|field| {
                field.is_required()
                    && mutation
                        .field(field.name())
                        .is_none_or(serde_json::Value::is_null)
            }) {
                return Err(AppError::Validation(format!(
                    "field '{}' is required on entity '{}'",
                    missing.name(),
                    self.entity_type
                )));
            }
        }

        Ok(())
    }
}

/// Registry of entity schemas built once at start-up.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<EntityType, EntitySchema>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema; each type may be registered once.
    pub fn register(&mut self, schema: EntitySchema) -> AppResult<()> {
        if self.schemas.contains_key(schema.entity_type()) {
            return Err(AppError::Conflict(format!(
                "entity '{}' is already registered",
                schema.entity_type()
            )));
        }

        self.schemas.insert(schema.entity_type().clone(), schema);
        Ok(())
    }

    /// Returns a schema.
    #[must_use]
    pub fn get(&self, entity_type: &EntityType) -> Option<&EntitySchema> {
        self.schemas.get(entity_type)
    }

    /// Returns a schema or a validation error for unknown types.
    pub fn require(&self, entity_type: &EntityType) -> AppResult<&EntitySchema> {
        self.get(entity_type).ok_or_else(|| {
            AppError::Validation(format!("entity '{entity_type}' is not registered"))
        })
    }

    /// Returns every registered schema.
    pub fn iter(&self) -> impl Iterator<Item = &EntitySchema> {
        self.schemas.values()
    }
}
