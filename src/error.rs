//! Sum-typed error taxonomy for the pipeline. The original system raised
//! bare `ValueError`s for critical lookups and let the caller figure out
//! whether that meant "drop this message" or "the process is broken";
//! here each kind carries that decision in the type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed JSON, out-of-range coordinates, or an unknown report type
    /// name. The message is dropped and logged; never requeued.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The reporter could not be resolved to an existing user. Dropped and
    /// logged (ingress is assumed to authenticate upstream).
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// A persisted type name does not match the closed enumeration. This
    /// indicates schema drift and is fatal for the consumer task.
    #[error("unknown report type in storage: {0}")]
    UnknownType(String),

    /// The store is unavailable or a constraint was violated. Per-message:
    /// log and drop. Repeated failures should not crash the consumer.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Cooperative cancellation was requested.
    #[error("shutdown requested")]
    Shutdown,
}

impl PipelineError {
    /// Whether this error indicates the consumer task itself must stop,
    /// as opposed to a single message being dropped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::UnknownType(_) | PipelineError::Shutdown)
    }
}
