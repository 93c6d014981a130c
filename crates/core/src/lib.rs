//! Shared primitives for all Rust crates in Warden.

#![forbid(unsafe_code)]

/// Request-scoped context carried through every query and mutation.
pub mod context;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use context::{
    ActorContext, CancellationHandle, CancellationSignal, PolicyDecision, RequestContext,
    UNKNOWN_ACTOR,
};

/// Result type used across Warden crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Write operation violates a uniqueness or reference constraint.
    #[error("constraint error: {0}")]
    Constraint(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Privacy policy denied the operation.
    #[error("permission denied: cannot {action} {object_type}")]
    PermissionDenied {
        /// Attempted action, e.g. `create` or `query`.
        action: String,
        /// Entity type the action targeted.
        object_type: String,
    },

    /// An audited write ran without an actor in the request context.
    #[error("actor required: {0}")]
    ActorRequired(String),

    /// The external authorization service rejected or failed a tuple call.
    #[error("authorization sync error: {0}")]
    AuthSync(String),

    /// The request was cancelled before an external call completed.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A hook was wired to an entity without the mutation capability it needs.
    #[error("unexpected mutation type: {0}")]
    UnexpectedMutationType(String),

    /// An audit hook was wired to an entity without audit fields.
    #[error("unexpected audit type: {0}")]
    UnexpectedAuditType(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Builds a permission-denied error for an action on an entity type.
    #[must_use]
    pub fn permission_denied(action: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self::PermissionDenied {
            action: action.into(),
            object_type: object_type.into(),
        }
    }

    /// Returns whether the error was raised by the caller's input rather than the system.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Constraint(_)
                | Self::Conflict(_)
                | Self::NotFound(_)
                | Self::PermissionDenied { .. }
                | Self::ActorRequired(_)
        )
    }
}
