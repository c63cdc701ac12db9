//! Error taxonomy shared by the handoff optimizer and metrics collector.
//!
//! The event bus has no failure modes of its own and never returns these.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::store::{StoreError, StoreResult};

/// Errors surfaced by coordination operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    /// No candidate agent exists for the requested workflow type.
    #[error("no available agents for workflow type: {0}")]
    NotFound(String),

    /// The persistence collaborator is unreachable or returned an error.
    #[error("persistence unavailable: {0}")]
    Unavailable(#[from] StoreError),

    /// A caller-supplied identifier or filter was malformed.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// Aggregated state that should be impossible (e.g. more completions than attempts).
    #[error("internal aggregation error: {0}")]
    Internal(String),

    /// The caller cancelled an in-flight persistence request.
    #[error("operation cancelled")]
    Cancelled,

    /// Handoff planning failed because target selection failed.
    #[error("no suitable agent for handoff: {0}")]
    Handoff(#[source] Box<CoordinationError>),

    /// Writing one workflow type's daily aggregate failed.
    #[error("failed to flush metrics for {workflow_type}: {source}")]
    Flush {
        workflow_type: String,
        #[source]
        source: StoreError,
    },
}

impl CoordinationError {
    /// Whether this error (or the error it wraps) means "no candidate agent".
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Handoff(inner) => inner.is_not_found(),
            _ => false,
        }
    }

    /// Whether this error (or the error it wraps) came from cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Handoff(inner) => inner.is_cancelled(),
            _ => false,
        }
    }
}

/// Result type for coordination operations.
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Await a store call, resolving to `Cancelled` if the token fires first.
pub(crate) async fn cancellable<T, F>(
    cancel: Option<&CancellationToken>,
    call: F,
) -> CoordinationResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(CoordinationError::Cancelled),
            result = call => result.map_err(CoordinationError::from),
        },
        None => call.await.map_err(CoordinationError::from),
    }
}
