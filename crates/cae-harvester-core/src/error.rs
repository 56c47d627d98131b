//! Typed errors for conditions callers branch on.
//!
//! Everything else travels as `anyhow::Error`.

use thiserror::Error;

use crate::models::CandidateStatus;

/// Failure to produce a novel query.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// Every width level ran out of attempts without finding an unseen
    /// query string. Not fatal: the harvest step is skipped.
    #[error("coverage exhausted: no novel query after {attempts} attempts")]
    CoverageExhausted { attempts: usize },

    #[error("no active keywords available to compose a query")]
    NoKeywords,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Errors from the promotion workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("row {row}: {reason}")]
    Validation { row: usize, reason: String },

    #[error("invalid promotion: {0}")]
    Invalid(String),

    #[error("candidate '{term}' is {from}; cannot move to {to}")]
    InvalidTransition {
        term: String,
        from: CandidateStatus,
        to: CandidateStatus,
    },

    #[error("no candidate named '{0}'")]
    UnknownCandidate(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Invalid numeric search qualifier bounds.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QualifierError {
    #[error("{name} minimum must be >= 0")]
    NegativeMin { name: String },

    #[error("{name} maximum must be >= 0")]
    NegativeMax { name: String },

    #[error("{name} minimum cannot be greater than maximum")]
    Inverted { name: String },
}
