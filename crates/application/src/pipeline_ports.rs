mod authorization;
mod backlog;
mod store;

pub use authorization::AuthorizationClient;
pub use backlog::{PendingTupleCleanup, TupleCleanupBacklog};
pub use store::{EntityStore, StoreTransaction};
