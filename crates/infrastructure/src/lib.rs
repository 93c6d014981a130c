//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod audit_clock;
mod http_authorization_client;
mod in_memory_authorization_client;
mod in_memory_entity_store;
mod in_memory_tuple_cleanup_backlog;
mod postgres_entity_store;
mod postgres_tuple_cleanup_backlog;

pub use http_authorization_client::{AuthorizationClientConfig, HttpAuthorizationClient};
pub use in_memory_authorization_client::InMemoryAuthorizationClient;
pub use in_memory_entity_store::InMemoryEntityStore;
pub use in_memory_tuple_cleanup_backlog::InMemoryTupleCleanupBacklog;
pub use postgres_entity_store::PostgresEntityStore;
pub use postgres_tuple_cleanup_backlog::PostgresTupleCleanupBacklog;

/// Embedded schema migrations for the Postgres adapters.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
