use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use warden_application::{PendingTupleCleanup, TupleCleanupBacklog};
use warden_core::{AppError, AppResult};

/// PostgreSQL-backed tuple cleanup backlog.
#[derive(Clone)]
pub struct PostgresTupleCleanupBacklog {
    pool: PgPool,
}

impl PostgresTupleCleanupBacklog {
    /// Creates a backlog with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct PendingCleanupRow {
    id: Uuid,
    object: String,
    reason: String,
    attempts: i32,
}

impl From<PendingCleanupRow> for PendingTupleCleanup {
    fn from(row: PendingCleanupRow) -> Self {
        Self {
            cleanup_id: row.id.to_string(),
            object: row.object,
            reason: row.reason,
            attempts: u32::try_from(row.attempts).unwrap_or_default(),
        }
    }
}

fn parse_cleanup_id(cleanup_id: &str) -> AppResult<Uuid> {
    Uuid::parse_str(cleanup_id).map_err(|error| {
        AppError::Validation(format!("invalid tuple cleanup id '{cleanup_id}': {error}"))
    })
}

#[async_trait]
impl TupleCleanupBacklog for PostgresTupleCleanupBacklog {
    async fn record_pending(&self, object: &str, reason: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tuple_cleanup_backlog (id, object, reason)
            VALUES ($1, $2, $3)
            ON CONFLICT (object) WHERE resolved_at IS NULL
            DO UPDATE SET
                reason = EXCLUDED.reason,
                attempts = tuple_cleanup_backlog.attempts + 1,
                last_attempt_at = now()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(object)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to record tuple cleanup for '{object}': {error}"
            ))
        })?;

        Ok(())
    }

    async fn list_pending(&self, limit: usize) -> AppResult<Vec<PendingTupleCleanup>> {
        let rows = sqlx::query_as::<_, PendingCleanupRow>(
            r#"
            SELECT id, object, reason, attempts
            FROM tuple_cleanup_backlog
            WHERE resolved_at IS NULL
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list pending tuple cleanups: {error}"))
        })?;

        Ok(rows.into_iter().map(PendingTupleCleanup::from).collect())
    }

    async fn mark_resolved(&self, cleanup_id: &str) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tuple_cleanup_backlog
            SET resolved_at = now(), last_attempt_at = now()
            WHERE id = $1 AND resolved_at IS NULL
            "#,
        )
        .bind(parse_cleanup_id(cleanup_id)?)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to resolve tuple cleanup '{cleanup_id}': {error}"
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "tuple cleanup '{cleanup_id}' does not exist"
            )));
        }
        Ok(())
    }

    async fn mark_attempt_failed(&self, cleanup_id: &str, reason: &str) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tuple_cleanup_backlog
            SET attempts = attempts + 1, reason = $2, last_attempt_at = now()
            WHERE id = $1 AND resolved_at IS NULL
            "#,
        )
        .bind(parse_cleanup_id(cleanup_id)?)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to record tuple cleanup attempt '{cleanup_id}': {error}"
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "tuple cleanup '{cleanup_id}' does not exist"
            )));
        }
        Ok(())
    }
}
