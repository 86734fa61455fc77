// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Exporter error taxonomy.

/// Errors surfaced by [`crate::ArrowExporter::send_and_wait`] and its
/// collaborators.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ExportError {
    /// The carrying stream is restarting; retried internally, callers only
    /// observe it if they inspect intermediate state.
    #[error("stream is restarting")]
    StreamRestarting,

    /// The destination answered `ERROR/UNAVAILABLE`; retryable.
    #[error("destination unavailable: {batch_id}: {message}")]
    Unavailable {
        /// Batch the status refers to.
        batch_id: i64,
        /// Server-provided message.
        message: String,
    },

    /// The destination answered `ERROR/RESOURCE_EXHAUSTED`; retryable with
    /// backoff.
    #[error("destination over limit: {batch_id}: {message}")]
    ResourceExhausted {
        /// Batch the status refers to.
        batch_id: i64,
        /// Server-provided message.
        message: String,
    },

    /// The destination answered `ERROR/INVALID_ARGUMENT`; permanent.
    #[error("invalid data rejected: {batch_id}: {message}")]
    InvalidArgument {
        /// Batch the status refers to.
        batch_id: i64,
        /// Server-provided message.
        message: String,
    },

    /// An unrecognized status; permanent, and fatal for the stream that
    /// carried it.
    #[error("unexpected stream response: {batch_id}: {message}")]
    Unexpected {
        /// Batch the status refers to.
        batch_id: i64,
        /// Server-provided message.
        message: String,
    },

    /// Encoding the records failed (including a caught encoder panic);
    /// permanent.
    #[error("encoding failed: {0}")]
    Encode(String),

    /// The per-request credentials plugin failed; permanent for this call.
    #[error("credentials unavailable: {0}")]
    Credentials(String),

    /// The endpoint could not be parsed at construction time.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The caller's context was canceled while the batch was in flight.
    #[error("export canceled")]
    Canceled,

    /// The exporter was shut down.
    #[error("exporter is shut down")]
    Shutdown,
}

impl ExportError {
    /// Whether retrying the same request can ever succeed.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ExportError::InvalidArgument { .. }
                | ExportError::Unexpected { .. }
                | ExportError::Encode(_)
                | ExportError::Credentials(_)
                | ExportError::InvalidEndpoint(_)
        )
    }

    /// Whether the caller may retry, possibly after a backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExportError::StreamRestarting
                | ExportError::Unavailable { .. }
                | ExportError::ResourceExhausted { .. }
        )
    }
}
