use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, QueryBuilder};
use tokio::sync::Mutex;
use uuid::Uuid;
use warden_application::{EntityStore, StoreTransaction};
use warden_core::{AppError, AppResult, RequestContext};
use warden_domain::{
    AuditFields, EntityQuery, EntityRecord, EntityType, Mutation, MutationOp, MutationOutput,
    Predicate, SchemaRegistry,
};

use crate::audit_clock::strictly_after;

const RECORD_COLUMNS: &str = "id, entity_type, fields, created_at, created_by, updated_at, \
                              updated_by, deleted_at, deleted_by";

const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL-backed entity store over the `entity_records` table.
#[derive(Clone)]
pub struct PostgresEntityStore {
    pool: PgPool,
    schemas: Arc<SchemaRegistry>,
}

impl PostgresEntityStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool, schemas: Arc<SchemaRegistry>) -> Self {
        Self { pool, schemas }
    }
}

#[async_trait]
impl EntityStore for PostgresEntityStore {
    async fn begin(&self) -> AppResult<Arc<dyn StoreTransaction>> {
        let transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to start entity transaction: {error}"))
        })?;

        Ok(Arc::new(PostgresEntityTransaction {
            schemas: self.schemas.clone(),
            transaction: Mutex::new(Some(transaction)),
        }))
    }
}

#[derive(Debug, FromRow)]
struct EntityRecordRow {
    id: Uuid,
    entity_type: String,
    fields: Value,
    created_at: Option<DateTime<Utc>>,
    created_by: Option<String>,
    updated_at: Option<DateTime<Utc>>,
    updated_by: Option<String>,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<String>,
}

impl EntityRecordRow {
    fn into_record(self) -> AppResult<EntityRecord> {
        let Value::Object(fields) = self.fields else {
            return Err(AppError::Internal(format!(
                "entity record '{}' has non-object fields",
                self.id
            )));
        };

        EntityRecord::new(
            self.id.to_string(),
            EntityType::new(self.entity_type)?,
            fields,
            AuditFields {
                created_at: self.created_at,
                created_by: self.created_by,
                updated_at: self.updated_at,
                updated_by: self.updated_by,
                deleted_at: self.deleted_at,
                deleted_by: self.deleted_by,
            },
        )
    }
}

struct PostgresEntityTransaction {
    schemas: Arc<SchemaRegistry>,
    transaction: Mutex<Option<sqlx::Transaction<'static, Postgres>>>,
}

fn finished() -> AppError {
    AppError::Internal("entity transaction is already committed or rolled back".to_owned())
}

fn map_write_error(step: &str, error: sqlx::Error) -> AppError {
    let unique_violation = error
        .as_database_error()
        .and_then(|database_error| database_error.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION);
    if unique_violation {
        return AppError::Constraint(format!("{step} violates a unique constraint: {error}"));
    }
    AppError::Internal(format!("failed to {step}: {error}"))
}

fn push_predicates(builder: &mut QueryBuilder<'_, Postgres>, predicates: &[Predicate]) {
    for predicate in predicates {
        match predicate {
            Predicate::IdEq(id) => match Uuid::parse_str(id) {
                Ok(id) => {
                    builder.push(" AND id = ");
                    builder.push_bind(id);
                }
                Err(_) => {
                    builder.push(" AND FALSE");
                }
            },
            Predicate::FieldEq { field, value } => {
                builder.push(" AND fields -> ");
                builder.push_bind(field.clone());
                builder.push(" = ");
                builder.push_bind(value.clone());
            }
            Predicate::DeletedAtIsNull => {
                builder.push(" AND deleted_at IS NULL");
            }
        }
    }
}

async fn select_records(
    connection: &mut PgConnection,
    entity_type: &EntityType,
    predicates: &[Predicate],
    limit: Option<usize>,
    for_update: bool,
) -> AppResult<Vec<EntityRecord>> {
    let mut builder: QueryBuilder<'_, Postgres> =
        QueryBuilder::new(format!("SELECT {RECORD_COLUMNS} FROM entity_records WHERE entity_type = "));
    builder.push_bind(entity_type.as_str().to_owned());
    push_predicates(&mut builder, predicates);
    builder.push(" ORDER BY created_at ASC NULLS LAST, id ASC");
    if let Some(limit) = limit {
        builder.push(" LIMIT ");
        builder.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    if for_update {
        builder.push(" FOR UPDATE");
    }

    let rows = builder
        .build_query_as::<EntityRecordRow>()
        .fetch_all(&mut *connection)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to query entity records of type '{entity_type}': {error}"
            ))
        })?;

    rows.into_iter().map(EntityRecordRow::into_record).collect()
}

impl PostgresEntityTransaction {
    async fn ensure_unique(
        &self,
        connection: &mut PgConnection,
        candidate: &EntityRecord,
        id: Uuid,
    ) -> AppResult<()> {
        if candidate.is_deleted() {
            return Ok(());
        }

        let schema = self.schemas.require(candidate.entity_type())?;
        for field in schema.fields().iter().filter(|field| field.is_unique()) {
            let Some(value) = candidate.field(field.name()).filter(|value| !value.is_null())
            else {
                continue;
            };

            // Serializes concurrent writers of the same unique column.
            let lock_key = format!("{}.{}", candidate.entity_type(), field.name());
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(lock_key)
                .execute(&mut *connection)
                .await
                .map_err(|error| {
                    AppError::Internal(format!("failed to lock unique field: {error}"))
                })?;

            let taken = sqlx::query_scalar::<_, bool>(
                r#"
                SELECT EXISTS (
                    SELECT 1
                    FROM entity_records
                    WHERE entity_type = $1
                      AND deleted_at IS NULL
                      AND id <> $2
                      AND fields -> $3 = $4
                )
                "#,
            )
            .bind(candidate.entity_type().as_str())
            .bind(id)
            .bind(field.name())
            .bind(value.clone())
            .fetch_one(&mut *connection)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to check unique field: {error}"))
            })?;

            if taken {
                return Err(AppError::Constraint(format!(
                    "{} with {} {value} already exists",
                    candidate.entity_type(),
                    field.name()
                )));
            }
        }

        Ok(())
    }

    async fn create(
        &self,
        connection: &mut PgConnection,
        mutation: &Mutation,
    ) -> AppResult<MutationOutput> {
        let id = Uuid::new_v4();
        let record = mutation.to_new_record(id.to_string())?;
        self.ensure_unique(connection, &record, id).await?;

        let row = sqlx::query_as::<_, EntityRecordRow>(&format!(
            r#"
            INSERT INTO entity_records (
                id, entity_type, fields, created_at, created_by, updated_at, updated_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(record.entity_type().as_str())
        .bind(Value::Object(record.fields().clone()))
        .bind(record.audit().created_at)
        .bind(record.audit().created_by.as_deref())
        .bind(record.audit().updated_at)
        .bind(record.audit().updated_by.as_deref())
        .fetch_one(&mut *connection)
        .await
        .map_err(|error| map_write_error("insert entity record", error))?;

        Ok(MutationOutput::new(vec![row.into_record()?]))
    }

    async fn update(
        &self,
        connection: &mut PgConnection,
        mutation: &Mutation,
    ) -> AppResult<MutationOutput> {
        let selection = mutation.selection().unwrap_or_default();
        let current =
            select_records(connection, mutation.entity_type(), &selection, None, true).await?;

        let mut affected = Vec::with_capacity(current.len());
        for mut record in current {
            let id = parse_id(record.id())?;
            let previous_update = record.audit().updated_at;
            mutation.apply_update(&mut record);
            if mutation.audit().updated_at.is_some() {
                record.audit_mut().updated_at =
                    strictly_after(previous_update, record.audit().updated_at);
            }
            self.ensure_unique(connection, &record, id).await?;

            let row = sqlx::query_as::<_, EntityRecordRow>(&format!(
                r#"
                UPDATE entity_records
                SET fields = $2,
                    updated_at = $3,
                    updated_by = $4,
                    deleted_at = $5,
                    deleted_by = $6
                WHERE id = $1
                RETURNING {RECORD_COLUMNS}
                "#
            ))
            .bind(id)
            .bind(Value::Object(record.fields().clone()))
            .bind(record.audit().updated_at)
            .bind(record.audit().updated_by.as_deref())
            .bind(record.audit().deleted_at)
            .bind(record.audit().deleted_by.as_deref())
            .fetch_one(&mut *connection)
            .await
            .map_err(|error| map_write_error("update entity record", error))?;
            affected.push(row.into_record()?);
        }

        if mutation.op() == MutationOp::UpdateOne && affected.is_empty() {
            return Err(not_found(mutation));
        }
        Ok(MutationOutput::new(affected))
    }

    async fn delete(
        &self,
        connection: &mut PgConnection,
        mutation: &Mutation,
    ) -> AppResult<MutationOutput> {
        let selection = mutation.selection().unwrap_or_default();
        let roots =
            select_records(connection, mutation.entity_type(), &selection, None, true).await?;

        // Post-order walk so dependents are removed before the rows they reference.
        let mut removed = Vec::new();
        let mut pending: Vec<(EntityRecord, bool)> =
            roots.into_iter().rev().map(|record| (record, false)).collect();
        while let Some((record, expanded)) = pending.pop() {
            if expanded {
                sqlx::query("DELETE FROM entity_records WHERE id = $1")
                    .bind(parse_id(record.id())?)
                    .execute(&mut *connection)
                    .await
                    .map_err(|error| map_write_error("delete entity record", error))?;
                removed.push(record);
                continue;
            }

            let schema = self.schemas.require(record.entity_type())?;
            let mut dependents = Vec::new();
            for edge in schema.edges() {
                let referencing = select_records(
                    connection,
                    edge.dependent_type(),
                    &[Predicate::field_eq(edge.foreign_key(), Value::from(record.id()))],
                    None,
                    true,
                )
                .await?;
                if referencing.is_empty() {
                    continue;
                }
                if !edge.is_cascade() {
                    return Err(AppError::Constraint(format!(
                        "{} '{}' is still referenced by {} {} row(s)",
                        record.entity_type(),
                        record.id(),
                        referencing.len(),
                        edge.dependent_type()
                    )));
                }
                dependents.extend(referencing);
            }

            pending.push((record, true));
            pending.extend(dependents.into_iter().rev().map(|dependent| (dependent, false)));
        }

        if mutation.op() == MutationOp::DeleteOne && removed.is_empty() {
            return Err(not_found(mutation));
        }
        Ok(MutationOutput::new(removed))
    }
}

fn parse_id(id: &str) -> AppResult<Uuid> {
    Uuid::parse_str(id)
        .map_err(|error| AppError::Internal(format!("invalid entity record id '{id}': {error}")))
}

fn not_found(mutation: &Mutation) -> AppError {
    AppError::NotFound(format!(
        "{} '{}' does not exist or was already deleted",
        mutation.entity_type(),
        mutation.target_id().unwrap_or_default()
    ))
}

#[async_trait]
impl StoreTransaction for PostgresEntityTransaction {
    async fn mutate(&self, _: &RequestContext, mutation: &Mutation) -> AppResult<MutationOutput> {
        let mut guard = self.transaction.lock().await;
        let transaction = guard.as_mut().ok_or_else(finished)?;
        let connection: &mut PgConnection = transaction;

        match mutation.op() {
            MutationOp::Create => self.create(connection, mutation).await,
            MutationOp::Update | MutationOp::UpdateOne => self.update(connection, mutation).await,
            MutationOp::Delete | MutationOp::DeleteOne => self.delete(connection, mutation).await,
        }
    }

    async fn query(&self, _: &RequestContext, query: &EntityQuery) -> AppResult<Vec<EntityRecord>> {
        let mut guard = self.transaction.lock().await;
        let transaction = guard.as_mut().ok_or_else(finished)?;

        select_records(
            transaction,
            query.entity_type(),
            query.predicates(),
            query.row_limit(),
            false,
        )
        .await
    }

    async fn commit(&self) -> AppResult<()> {
        let transaction = self.transaction.lock().await.take().ok_or_else(finished)?;
        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit entity transaction: {error}"))
        })
    }

    async fn rollback(&self) -> AppResult<()> {
        let Some(transaction) = self.transaction.lock().await.take() else {
            return Ok(());
        };
        transaction.rollback().await.map_err(|error| {
            AppError::Internal(format!("failed to roll back entity transaction: {error}"))
        })
    }
}
