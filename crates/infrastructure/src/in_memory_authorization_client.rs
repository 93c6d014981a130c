use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;
use warden_application::{
    AuthorizationClient, INHERITED_RELATIONS, PARENT_RELATION, RELATION_IMPLICATIONS,
};
use warden_core::AppResult;
use warden_domain::RelationshipTuple;

const MAX_PARENT_DEPTH: usize = 8;

/// In-memory relationship store evaluating the catalog's relation model.
///
/// A subject holds a relation on an object when the tuple exists, when a
/// granted relation implies it, or when it is inherited from a parent object.
#[derive(Debug, Default)]
pub struct InMemoryAuthorizationClient {
    tuples: RwLock<HashSet<RelationshipTuple>>,
}

impl InMemoryAuthorizationClient {
    /// Creates an empty client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every stored tuple.
    pub async fn tuples(&self) -> Vec<RelationshipTuple> {
        self.tuples.read().await.iter().cloned().collect()
    }

    /// Returns tuples whose object is `object`.
    pub async fn tuples_for_object(&self, object: &str) -> Vec<RelationshipTuple> {
        self.tuples
            .read()
            .await
            .iter()
            .filter(|tuple| tuple.object() == object)
            .cloned()
            .collect()
    }
}

fn implies(granted: &str, relation: &str) -> bool {
    granted == relation
        || RELATION_IMPLICATIONS
            .iter()
            .any(|(source, implied)| *source == granted && implied.contains(&relation))
}

fn holds(
    tuples: &HashSet<RelationshipTuple>,
    subject: &str,
    relation: &str,
    object: &str,
    depth: usize,
) -> bool {
    let direct = tuples.iter().any(|tuple| {
        tuple.object() == object && tuple.subject() == subject && implies(tuple.relation(), relation)
    });
    if direct || depth >= MAX_PARENT_DEPTH || !INHERITED_RELATIONS.contains(&relation) {
        return direct;
    }

    tuples
        .iter()
        .filter(|tuple| tuple.object() == object && tuple.relation() == PARENT_RELATION)
        .any(|link| holds(tuples, subject, relation, link.subject(), depth + 1))
}

#[async_trait]
impl AuthorizationClient for InMemoryAuthorizationClient {
    async fn write_tuples(&self, tuples: &[RelationshipTuple]) -> AppResult<()> {
        self.tuples.write().await.extend(tuples.iter().cloned());
        Ok(())
    }

    async fn delete_all_object_relations(&self, object: &str) -> AppResult<()> {
        self.tuples
            .write()
            .await
            .retain(|tuple| tuple.object() != object);
        Ok(())
    }

    async fn check(&self, subject: &str, relation: &str, object: &str) -> AppResult<bool> {
        let tuples = self.tuples.read().await;
        Ok(holds(&tuples, subject, relation, object, 0))
    }
}
