use serde::{Deserialize, Serialize};

use crate::entity::EntityType;

/// Relationship fact stored in the external authorization service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipTuple {
    subject: String,
    relation: String,
    object: String,
}

impl RelationshipTuple {
    /// Creates a tuple.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            relation: relation.into(),
            object: object.into(),
        }
    }

    /// Returns the subject, e.g. `user:alice`.
    #[must_use]
    pub fn subject(&self) -> &str {
        self.subject.as_str()
    }

    /// Returns the relation name.
    #[must_use]
    pub fn relation(&self) -> &str {
        self.relation.as_str()
    }

    /// Returns the object, e.g. `organization:42`.
    #[must_use]
    pub fn object(&self) -> &str {
        self.object.as_str()
    }
}

/// Formats the authorization object reference `"{lowercased-type}:{id}"`.
#[must_use]
pub fn object_ref(entity_type: &EntityType, id: &str) -> String {
    format!("{}:{id}", entity_type.tuple_namespace())
}

/// Formats the authorization subject for a user actor.
#[must_use]
pub fn user_subject(actor: &str) -> String {
    format!("user:{actor}")
}
