use crate::store::LeadStatus;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// A single violated field from the validator. The validator reports every
/// violation in one pass, not just the first.
#[derive(Debug, Clone, Serialize)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        FieldViolation {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub(crate) fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {}", join_violations(.0))]
    Validation(Vec<FieldViolation>),

    #[error("consent is required to process a CV request")]
    ConsentRequired,

    #[error("submission rejected as spam: {reason}")]
    SpamRejected { reason: String },

    #[error("rate limit exceeded, retry in {} seconds", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: LeadStatus, to: LeadStatus },

    #[error("lead {0} not found")]
    NotFound(Uuid),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] rusqlite::Error),
}

impl PipelineError {
    /// Stable machine-readable code used on the wire and in logs.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation_error",
            PipelineError::ConsentRequired => "consent_required",
            PipelineError::SpamRejected { .. } => "spam_rejected",
            PipelineError::RateLimited { .. } => "rate_limited",
            PipelineError::InvalidTransition { .. } => "invalid_transition",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}
