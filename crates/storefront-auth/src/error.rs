//! Error types for authenticated client operations

use std::time::Duration;

use reqwest::StatusCode;

/// Why a refresh cycle failed.
///
/// `Clone` because a single failure is delivered to every request that was
/// queued behind the refresh.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("refresh request failed: {0}")]
    Transport(String),

    #[error("refresh rejected ({status}): {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("malformed refresh response: {0}")]
    Malformed(String),

    #[error("refresh timed out after {0:?}")]
    Timeout(Duration),

    #[error("storing refreshed credential failed: {0}")]
    Store(String),

    #[error("session ended, sign in again")]
    SessionEnded,

    #[error("refresh aborted before settling")]
    Aborted,
}

/// Errors from authenticated client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request failed ({status}): {body}")]
    Status { status: StatusCode, body: String },

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error("credential store error: {0}")]
    Store(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("response decode error: {0}")]
    Decode(String),
}

impl Error {
    /// HTTP status carried by a passed-through error response, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Status { status, .. } => Some(*status),
            Error::Refresh(RefreshError::Rejected { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
