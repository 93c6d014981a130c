use async_trait::async_trait;
use warden_core::AppResult;

/// Object whose relationship tuples could not be removed after a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTupleCleanup {
    /// Stable backlog entry id.
    pub cleanup_id: String,
    /// Authorization object reference, e.g. `organization:42`.
    pub object: String,
    /// Last failure message.
    pub reason: String,
    /// Failed attempts so far, including the original delete.
    pub attempts: u32,
}

/// Port for the orphaned-tuple backlog drained by the reconciler.
#[async_trait]
pub trait TupleCleanupBacklog: Send + Sync {
    /// Records an object whose tuples are orphaned.
    async fn record_pending(&self, object: &str, reason: &str) -> AppResult<()>;

    /// Lists unresolved entries, oldest first.
    async fn list_pending(&self, limit: usize) -> AppResult<Vec<PendingTupleCleanup>>;

    /// Marks an entry as cleaned up.
    async fn mark_resolved(&self, cleanup_id: &str) -> AppResult<()>;

    /// Records another failed attempt for an entry.
    async fn mark_attempt_failed(&self, cleanup_id: &str, reason: &str) -> AppResult<()>;
}
