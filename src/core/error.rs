//! Error types.
//!
//! Trellis defines one central error enum covering the recoverable
//! conditions of the prefix manager. No variant is fatal to the event
//! loop: malformed inputs are logged and skipped, store rejections are
//! retried, and snapshot failures reconcile on the next successful write.

use thiserror::Error;

/// Common Trellis error conditions.
#[derive(Debug, Error)]
pub enum TrellisError {
    /// A replicated-store key that was not produced by the key codec.
    #[error("malformed store key: {key}")]
    MalformedKey { key: String },

    /// A prefix string that is not `address/length`.
    #[error("malformed prefix: {value}")]
    MalformedPrefix { value: String },

    /// A serialized record that could not be decoded.
    #[error("failed to decode {context}")]
    Deserialization { context: &'static str },

    /// The replicated store refused a write (version too low).
    #[error("store rejected write for {key} at version {version}")]
    StoreWriteRejected { key: String, version: u64 },

    /// The durable snapshot could not be written.
    ///
    /// Never fails the originating mutation; a later successful write
    /// reconciles the on-disk state.
    #[error("snapshot write failed: {message}")]
    SnapshotWriteFailure { message: String },

    /// A request missing required fields for its command.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The prefix manager has stopped accepting work.
    #[error("prefix manager is shutting down")]
    ShuttingDown,

    /// Underlying I/O failure from the durable config store.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrellisError {
    /// Create an InvalidRequest error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Check if this error indicates the operation should be retried.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::StoreWriteRejected { .. })
    }
}

/// Result type using TrellisError.
pub type TrellisResult<T> = Result<T, TrellisError>;
