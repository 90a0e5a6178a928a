use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::Money;

/// Stable error taxonomy crossing every component boundary. Component-internal
/// errors (I/O, serde, transport) are wrapped with `anyhow::Context` up to the
/// boundary where they enter a public API, then normalized into one of these.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineError {
    #[error("budget denied, remaining {remaining}")]
    BudgetDenied { remaining: Money },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("no provider available for this request")]
    NoProviderAvailable,

    #[error("provider transient error: {message}")]
    ProviderTransient { message: String },

    #[error("provider fatal error: {message}")]
    ProviderFatal { message: String },

    #[error("queue conflict on job {job_id}")]
    QueueConflict { job_id: String },

    #[error("ambiguous id prefix {prefix:?} matches {count} jobs")]
    AmbiguousPrefix { prefix: String, count: usize },

    #[error("no job matches id or prefix {prefix:?}")]
    NotFound { prefix: String },

    #[error("state corruption detected: {message}")]
    StateCorruption { message: String },
}

impl EngineError {
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::BudgetDenied { .. } => 402,
            EngineError::InvalidRequest { .. } => 400,
            EngineError::NoProviderAvailable => 503,
            EngineError::ProviderTransient { .. } => 502,
            EngineError::ProviderFatal { .. } => 422,
            EngineError::QueueConflict { .. } => 409,
            EngineError::AmbiguousPrefix { .. } => 409,
            EngineError::NotFound { .. } => 404,
            EngineError::StateCorruption { .. } => 500,
        }
    }

    pub fn retry_hint(&self) -> Option<&'static str> {
        match self {
            EngineError::ProviderTransient { .. } => Some("retry with backoff"),
            EngineError::QueueConflict { .. } => Some("retry the read-modify-write"),
            _ => None,
        }
    }
}

/// Classification an adapter assigns to a provider-raw error, used by the
/// Router to decide retry/fallback/terminal handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    RateLimit,
    Auth,
    InvalidRequest,
    ProviderDown,
}

impl ErrorClass {
    /// Fatal classes never fall back; the job goes straight to FAILED.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorClass::Auth | ErrorClass::InvalidRequest)
    }
}
