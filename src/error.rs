//! Error types for the engine, the workflow and the payroll service.

use crate::filter::Predicate;
use crate::models::Scope;
use thiserror::Error;

/// Errors raised by the synchronous filter/group/sort/export pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A running total no longer fits in a decimal.
    #[error("amount overflow while totalling field '{field}'")]
    Overflow { field: String },

    #[error("at most {max} sort levels are supported, got {got}")]
    TooManySortLevels { max: usize, got: usize },

    #[error("export needs at least one column")]
    NoColumns,

    /// Export delimiters are single bytes.
    #[error("export delimiter '{delimiter}' is not ASCII")]
    DelimiterNotAscii { delimiter: char },

    #[error("export write failed: {message}")]
    Write { message: String },
}

/// Errors reported by the payroll service collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Network or service fault; the call may be retried unchanged.
    #[error("payroll service unavailable: {0}")]
    Unavailable(String),

    /// The service understood the request and refused it.
    #[error("payroll service rejected the request: {0}")]
    Rejected(String),

    #[error("unknown subject '{0}'")]
    UnknownSubject(String),
}

/// Errors returned by [`WorkflowSession`](crate::workflow::WorkflowSession)
/// actions. Remote faults are not errors here: they move the session into
/// `Failed` and are read back from the stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    /// The scope is incomplete or names nothing resolvable.
    #[error("scope invalid: {reason}")]
    ScopeInvalid { reason: String },

    /// The action is not allowed from the current stage.
    #[error("cannot {action} while {stage}")]
    InvalidTransition {
        action: &'static str,
        stage: &'static str,
    },

    /// The session reached `Committed` or `Cancelled` and must be dropped.
    #[error("session is finished ({stage}); start a new one")]
    SessionFinished { stage: &'static str },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Why a session ended up in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// The fetch succeeded but nothing matched. Carries the scope and the
    /// filter conditions that produced the empty population so the
    /// operator can correct either.
    NoEligibleRecords { scope: Scope, filters: Predicate },
    /// The fetch call errored.
    ValidationUnavailable { message: String },
    /// The commit call errored or was refused.
    CommitRejected { message: String },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::NoEligibleRecords { scope, filters } if filters.is_empty() => {
                write!(f, "no eligible records for {scope}")
            }
            FailureReason::NoEligibleRecords { scope, filters } => write!(
                f,
                "no eligible records for {scope} under {} filter condition(s)",
                filters.conditions().len()
            ),
            FailureReason::ValidationUnavailable { message } => {
                write!(f, "validation unavailable: {message}")
            }
            FailureReason::CommitRejected { message } => write!(f, "commit rejected: {message}"),
        }
    }
}
