use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{AppError, AppResult};

/// Subject recorded when a write runs without an authenticated actor.
pub const UNKNOWN_ACTOR: &str = "unknown";

/// Authenticated principal performing a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorContext {
    subject: String,
}

impl ActorContext {
    /// Creates an actor from the principal identifier.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }

    /// Returns the principal identifier.
    #[must_use]
    pub fn subject(&self) -> &str {
        self.subject.as_str()
    }
}

/// Tri-state privacy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    /// Operation is permitted; evaluation stops.
    Allow,
    /// Operation is rejected; evaluation stops.
    Deny,
    /// Rule has no opinion; evaluation continues with the next rule.
    Skip,
}

impl PolicyDecision {
    /// Returns a stable label for logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Skip => "skip",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DecisionOverride(PolicyDecision);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SkipSoftDelete(bool);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SoftDeleteInProgress(bool);

/// Owner side of a request cancellation signal.
#[derive(Debug)]
pub struct CancellationHandle {
    sender: watch::Sender<bool>,
}

impl CancellationHandle {
    /// Cancels every context carrying the paired signal.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

/// Observer side of a request cancellation signal.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    receiver: watch::Receiver<bool>,
}

impl CancellationSignal {
    /// Creates a linked handle and signal.
    #[must_use]
    pub fn pair() -> (CancellationHandle, Self) {
        let (sender, receiver) = watch::channel(false);
        (CancellationHandle { sender }, Self { receiver })
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the handle is
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Immutable request-scoped context.
///
/// Every setter returns a derived context and leaves the receiver untouched, so a
/// value set for one call chain never leaks into a sibling request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    actor: Option<ActorContext>,
    decision_override: Option<DecisionOverride>,
    skip_soft_delete: SkipSoftDelete,
    soft_delete_in_progress: SoftDeleteInProgress,
    cancellation: Option<CancellationSignal>,
}

impl RequestContext {
    /// Creates an empty context with no actor and no flags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a derived context carrying the actor.
    #[must_use]
    pub fn with_actor(&self, subject: impl Into<String>) -> Self {
        Self {
            actor: Some(ActorContext::new(subject)),
            ..self.clone()
        }
    }

    /// Returns the actor, if one was set.
    #[must_use]
    pub fn actor(&self) -> Option<&ActorContext> {
        self.actor.as_ref()
    }

    /// Returns the actor subject, if one was set.
    #[must_use]
    pub fn actor_subject(&self) -> Option<&str> {
        self.actor.as_ref().map(ActorContext::subject)
    }

    /// Returns a derived context forcing the policy decision.
    ///
    /// A `Skip` override clears any existing override.
    #[must_use]
    pub fn with_decision_override(&self, decision: PolicyDecision) -> Self {
        let decision_override = match decision {
            PolicyDecision::Skip => None,
            decision => Some(DecisionOverride(decision)),
        };

        Self {
            decision_override,
            ..self.clone()
        }
    }

    /// Returns the forced policy decision, if any.
    #[must_use]
    pub fn decision_override(&self) -> Option<PolicyDecision> {
        self.decision_override.map(|DecisionOverride(decision)| decision)
    }

    /// Returns a derived context that includes soft-deleted rows in reads and
    /// lets deletes remove rows for real.
    #[must_use]
    pub fn with_skip_soft_delete(&self) -> Self {
        Self {
            skip_soft_delete: SkipSoftDelete(true),
            ..self.clone()
        }
    }

    /// Returns whether soft-delete handling is bypassed.
    #[must_use]
    pub fn is_skip_soft_delete(&self) -> bool {
        self.skip_soft_delete.0
    }

    /// Returns a derived context telling nested hooks that the current update is a
    /// rewritten delete.
    #[must_use]
    pub fn with_soft_delete_in_progress(&self) -> Self {
        Self {
            soft_delete_in_progress: SoftDeleteInProgress(true),
            ..self.clone()
        }
    }

    /// Returns whether the current update is a rewritten delete.
    #[must_use]
    pub fn is_soft_delete_in_progress(&self) -> bool {
        self.soft_delete_in_progress.0
    }

    /// Returns a derived context with the in-progress flag cleared.
    #[must_use]
    pub fn without_soft_delete_in_progress(&self) -> Self {
        Self {
            soft_delete_in_progress: SoftDeleteInProgress(false),
            ..self.clone()
        }
    }

    /// Returns a derived context observing the cancellation signal.
    #[must_use]
    pub fn with_cancellation(&self, signal: CancellationSignal) -> Self {
        Self {
            cancellation: Some(signal),
            ..self.clone()
        }
    }

    /// Returns whether the request was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationSignal::is_cancelled)
    }

    /// Runs a future unless the request is cancelled first.
    pub async fn cancellable<F, T>(&self, operation: &str, future: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        let Some(signal) = self.cancellation.as_ref() else {
            return future.await;
        };

        if signal.is_cancelled() {
            return Err(AppError::Cancelled(format!(
                "{operation} was not started because the request was cancelled"
            )));
        }

        tokio::select! {
            biased;
            () = signal.cancelled() => Err(AppError::Cancelled(format!(
                "{operation} was interrupted because the request was cancelled"
            ))),
            result = future => result,
        }
    }
}
