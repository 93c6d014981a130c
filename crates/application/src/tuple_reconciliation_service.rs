use std::sync::Arc;

use warden_core::{AppResult, RequestContext};

use crate::{AuthorizationClient, TupleCleanupBacklog};

/// Outcome of one reconciliation batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// Backlog entries retried.
    pub attempted: usize,
    /// Entries whose tuples are now gone.
    pub resolved: usize,
    /// Entries that failed again and stay pending.
    pub failed: usize,
}

/// Retries tuple cleanup for objects whose local delete already committed.
#[derive(Clone)]
pub struct TupleReconciliationService {
    authorization: Arc<dyn AuthorizationClient>,
    backlog: Arc<dyn TupleCleanupBacklog>,
}

impl TupleReconciliationService {
    /// Creates a reconciliation service.
    #[must_use]
    pub fn new(
        authorization: Arc<dyn AuthorizationClient>,
        backlog: Arc<dyn TupleCleanupBacklog>,
    ) -> Self {
        Self {
            authorization,
            backlog,
        }
    }

    /// Retries up to `limit` pending cleanups, oldest first.
    pub async fn reconcile_pending(
        &self,
        ctx: &RequestContext,
        limit: usize,
    ) -> AppResult<ReconciliationReport> {
        let pending = self.backlog.list_pending(limit).await?;
        let mut report = ReconciliationReport {
            attempted: pending.len(),
            ..ReconciliationReport::default()
        };

        for entry in pending {
            let result = ctx
                .cancellable(
                    "retry relationship tuple cleanup",
                    self.authorization.delete_all_object_relations(&entry.object),
                )
                .await;

            match result {
                Ok(()) => {
                    self.backlog.mark_resolved(&entry.cleanup_id).await?;
                    report.resolved += 1;
                    tracing::info!(
                        cleanup_id = %entry.cleanup_id,
                        object = %entry.object,
                        attempts = entry.attempts + 1,
                        "orphaned relationship tuples removed"
                    );
                }
                Err(error) => {
                    if ctx.is_cancelled() {
                        return Err(error);
                    }
                    self.backlog
                        .mark_attempt_failed(&entry.cleanup_id, &error.to_string())
                        .await?;
                    report.failed += 1;
                    tracing::warn!(
                        cleanup_id = %entry.cleanup_id,
                        object = %entry.object,
                        error = %error,
                        "relationship tuple cleanup failed again"
                    );
                }
            }
        }

        Ok(report)
    }
}
