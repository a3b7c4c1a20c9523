//! Crate-wide error types.
//!
//! All fallible operations in the broker resolve to [`BrokerError`]. Variants
//! are grouped by semantic kind rather than by the subsystem that raised
//! them, so callers can match on "what went wrong" without needing to know
//! which internal component detected it.

// Layer 1: standard library imports
use std::fmt;

// Layer 2: third-party crate imports
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Semantic error kinds raised by the broker.
///
/// Each variant carries the context needed to explain the failure without
/// a caller having to re-derive it from surrounding state.
#[derive(Debug, Error, Clone)]
pub enum BrokerError {
    /// A caller-supplied argument was malformed: a bad topic name, an
    /// unknown schema, a message over `maxMessageSize`, or a topic whose
    /// cumulative byte admission would exceed `maxSizeBytes`.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// A referenced topic or client id does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// A topic create call collided with an existing topic name.
    #[error("already exists: topic '{topic}'")]
    AlreadyExists { topic: String },

    /// A client id was found but does not have the role the caller expected
    /// (e.g. `ack` called with a producer id).
    #[error("type mismatch: client {client_id} is {actual}, expected {expected}")]
    TypeMismatch {
        client_id: u64,
        expected: &'static str,
        actual: &'static str,
    },

    /// The configured schema validator rejected a published payload.
    #[error("validation failed for schema '{schema}': {reason}")]
    ValidationFailure { schema: String, reason: String },

    /// The persistent store failed to `put`/`get`/`del`/flush.
    #[error("storage failure during {operation}: {reason}")]
    StorageFailure { operation: &'static str, reason: String },

    /// The payload or metadata codec failed to encode or decode.
    #[error("codec failure during {operation}: {reason}")]
    CodecFailure { operation: &'static str, reason: String },

    /// A cooperative cancellation (e.g. `unsubscribe`). Callers should treat
    /// this as a clean stop, not a failure.
    #[error("aborted")]
    Aborted,

    /// An invariant that the broker itself is responsible for upholding was
    /// violated. Indicates a bug, not caller misuse.
    #[error("internal invariant violation: {reason}")]
    Internal { reason: String },
}

impl BrokerError {
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument { reason: reason.into() }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn already_exists(topic: impl Into<String>) -> Self {
        Self::AlreadyExists { topic: topic.into() }
    }

    pub fn type_mismatch(client_id: u64, expected: &'static str, actual: &'static str) -> Self {
        Self::TypeMismatch { client_id, expected, actual }
    }

    pub fn validation_failure(schema: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ValidationFailure { schema: schema.into(), reason: reason.into() }
    }

    pub fn storage_failure(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::StorageFailure { operation, reason: reason.into() }
    }

    pub fn codec_failure(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::CodecFailure { operation, reason: reason.into() }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal { reason: reason.into() }
    }

    /// Whether this error represents a clean, caller-requested cancellation
    /// rather than a true failure.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Per-message outcome reported by a batch publish call. `spec.md` §7
/// requires that a single message's failure never aborts the rest of the
/// batch.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub message_id: u64,
    pub error: Option<BrokerError>,
}

impl PublishOutcome {
    pub fn ok(message_id: u64) -> Self {
        Self { message_id, error: None }
    }

    pub fn failed(message_id: u64, error: BrokerError) -> Self {
        Self { message_id, error: Some(error) }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(err) => write!(f, "message {} failed: {err}", self.message_id),
            None => write!(f, "message {} published", self.message_id),
        }
    }
}
