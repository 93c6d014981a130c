use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;
use warden_application::{PendingTupleCleanup, TupleCleanupBacklog};
use warden_core::{AppError, AppResult};

/// In-memory tuple cleanup backlog.
#[derive(Debug, Default)]
pub struct InMemoryTupleCleanupBacklog {
    entries: Mutex<Vec<PendingTupleCleanup>>,
}

impl InMemoryTupleCleanupBacklog {
    /// Creates an empty backlog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TupleCleanupBacklog for InMemoryTupleCleanupBacklog {
    async fn record_pending(&self, object: &str, reason: &str) -> AppResult<()> {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.iter_mut().find(|entry| entry.object == object) {
            existing.attempts = existing.attempts.saturating_add(1);
            existing.reason = reason.to_owned();
            return Ok(());
        }

        entries.push(PendingTupleCleanup {
            cleanup_id: Uuid::new_v4().to_string(),
            object: object.to_owned(),
            reason: reason.to_owned(),
            attempts: 1,
        });
        Ok(())
    }

    async fn list_pending(&self, limit: usize) -> AppResult<Vec<PendingTupleCleanup>> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_resolved(&self, cleanup_id: &str) -> AppResult<()> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|entry| entry.cleanup_id != cleanup_id);
        if entries.len() == before {
            return Err(AppError::NotFound(format!(
                "tuple cleanup '{cleanup_id}' does not exist"
            )));
        }
        Ok(())
    }

    async fn mark_attempt_failed(&self, cleanup_id: &str, reason: &str) -> AppResult<()> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .iter_mut()
            .find(|entry| entry.cleanup_id == cleanup_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("tuple cleanup '{cleanup_id}' does not exist"))
            })?;
        entry.attempts = entry.attempts.saturating_add(1);
        entry.reason = reason.to_owned();
        Ok(())
    }
}
