//! Response status classification
//!
//! The storefront backend signals an invalid or expired access credential with
//! either 401 or 422 (its JWT layer answers 422 for malformed/expired tokens),
//! so both are treated as one class. Everything else is either a success or an
//! error the client passes through untouched.

use reqwest::StatusCode;

/// How the retry policy treats a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// Credential invalid or expired; eligible for one refresh-and-retry
    AuthExpired,
    /// Any other failure, returned to the caller as-is
    Other,
}

/// Classify a response status.
pub fn classify(status: StatusCode) -> StatusClass {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::UNPROCESSABLE_ENTITY => StatusClass::AuthExpired,
        s if s.is_client_error() || s.is_server_error() => StatusClass::Other,
        _ => StatusClass::Success,
    }
}
