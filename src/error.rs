//! Error types surfaced by the resource manager
//!
//! Admission failures and terminal load failures are returned as values;
//! context loss is reported through events instead (see `events`).

use thiserror::Error;

use crate::assets::BudgetCategory;
use crate::context::ContextId;

/// Errors from the context pool
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The backend refused to create a context (driver or OS failure)
    #[error("context creation refused by backend: {0}")]
    CreationFailed(String),

    /// The id was never issued or has already been released
    #[error("unknown or released context handle {0}")]
    UnknownHandle(ContextId),

    /// Lifecycle transition that does not apply to the context's state
    #[error("context {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: ContextId,
        from: &'static str,
        to: &'static str,
    },
}

/// Errors from the asset scheduler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    /// The footprint estimate does not fit the category's remaining budget
    #[error("{category} budget exceeded: requested {requested} bytes, {remaining} bytes remaining")]
    BudgetExceeded {
        category: BudgetCategory,
        requested: u64,
        remaining: u64,
    },

    /// Non-retriable fetch failure (missing file, rejected request)
    #[error("load of {key} failed: {reason}")]
    Permanent { key: String, reason: String },

    /// Transient failures persisted through every attempt
    #[error("load of {key} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        key: String,
        attempts: u32,
        last_error: String,
    },

    /// The scheduler went away before the load resolved
    #[error("load of {0} was abandoned before completion")]
    Abandoned(String),
}

impl AssetError {
    /// Admission failures are never retried by the scheduler
    pub fn is_admission_failure(&self) -> bool {
        matches!(self, AssetError::BudgetExceeded { .. })
    }
}

pub type AssetResult<T> = std::result::Result<T, AssetError>;
