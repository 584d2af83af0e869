use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Failures reported by a signaling store backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store unavailable")]
    Unavailable,
}

/// Errors surfaced by the live-room orchestrator.
///
/// Failures are scoped to the operation (or single peer pair) that
/// produced them; none of these variants ends a room.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiveError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not permitted: {0}")]
    Policy(String),

    #[error("guest slots are full (max {max_guests})")]
    Capacity { max_guests: u32 },

    #[error("slow down: retry in {retry_after_ms}ms")]
    Throttled { retry_after_ms: u64 },

    #[error("store temporarily unavailable: {0}")]
    TransientStore(String),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(StoreError),
}

impl LiveError {
    /// Only transient store failures may be retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LiveError::TransientStore(_))
    }

    /// Denials and bad input that should be shown to the user rather than
    /// logged as faults.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            LiveError::Validation(_)
                | LiveError::Policy(_)
                | LiveError::Capacity { .. }
                | LiveError::Throttled { .. }
        )
    }
}

impl From<StoreError> for LiveError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transient(msg) => LiveError::TransientStore(msg),
            StoreError::NotFound(path) => LiveError::NotFound(path),
            other => LiveError::Store(other),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for LiveError {
    fn from(err: serde_json::Error) -> Self {
        LiveError::Store(StoreError::from(err))
    }
}
