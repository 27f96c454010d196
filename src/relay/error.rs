//! Failure outcomes of handling a single bus message

use std::time::Duration;
use thiserror::Error;

use crate::mastodon::PostingError;

/// Payload could not be turned into an inbound message
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Attachment index counts the merged list, legacy `image` last
    #[error("attachment {index} is not valid base64: {source}")]
    Media {
        index: usize,
        source: base64::DecodeError,
    },
}

/// Per-message errors; none of them stop the relay
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Authentication against {server} failed: {source}")]
    Auth {
        server: String,
        source: PostingError,
    },

    #[error("Upload of attachment {index} failed: {source}")]
    Upload { index: usize, source: PostingError },

    #[error("Posting status failed: {0}")]
    Post(#[source] PostingError),

    #[error("Message handling timed out after {0:?}")]
    Timeout(Duration),
}

impl RelayError {
    /// Short label for log lines and counters
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Decode(_) => "decode",
            RelayError::Auth { .. } => "auth",
            RelayError::Upload { .. } => "upload",
            RelayError::Post(_) => "post",
            RelayError::Timeout(_) => "timeout",
        }
    }
}
