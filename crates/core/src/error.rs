use thiserror::Error;

use crate::model::SessionId;

/// Caller bugs detected by the engines.
///
/// These are never retried; the caller is expected to propagate them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PreconditionViolation {
    #[error("candidate pool is empty")]
    EmptyCandidatePool,
    #[error("practice session {0} is already finished")]
    SessionFinished(SessionId),
}
