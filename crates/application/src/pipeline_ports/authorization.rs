use async_trait::async_trait;
use warden_core::AppResult;
use warden_domain::RelationshipTuple;

/// Port for the external relationship-based authorization service.
///
/// Implementations are long-lived and shared across requests.
#[async_trait]
pub trait AuthorizationClient: Send + Sync {
    /// Writes every tuple or none of them. Adapters may reject batches larger
    /// than one atomic request allows.
    async fn write_tuples(&self, tuples: &[RelationshipTuple]) -> AppResult<()>;

    /// Removes every tuple whose object is `object`.
    async fn delete_all_object_relations(&self, object: &str) -> AppResult<()>;

    /// Returns whether `subject` holds `relation` on `object`.
    async fn check(&self, subject: &str, relation: &str, object: &str) -> AppResult<bool>;
}
