//! Error taxonomy shared by every access-control operation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccessError {
    /// Document, link or invitation is absent. Disabled and expired link
    /// tokens are reported through this variant as well.
    #[error("{0} not found")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid request: {0}")]
    Validation(String),

    /// Optimistic-concurrency mismatch on an annotation write.
    #[error("version conflict: expected {expected}, stored {current}")]
    Conflict { expected: u64, current: u64 },

    /// Cache or notification collaborator unavailable.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AccessResult<T> = Result<T, AccessError>;

impl AccessError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(reason.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    /// Stable machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Validation(_) => "VALIDATION",
            Self::Conflict { .. } => "CONFLICT",
            Self::Transient(_) => "TRANSIENT",
            Self::Internal(_) => "INTERNAL",
        }
    }
}
