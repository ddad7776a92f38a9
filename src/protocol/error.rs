//! Error types for request processing.
//!
//! `WouldBlock` is deliberately absent from this taxonomy: a socket that
//! cannot make progress surfaces as [`crate::step::Step::Pending`], never as
//! an error. Everything here is a genuine failure of one connection and is
//! confined to it.

use std::io;

use http::StatusCode;
use thiserror::Error;

/// Errors that occur while reading, parsing or answering one request.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The peer performed an orderly close. Before a complete request this
    /// is swallowed silently; mid-exchange it terminates the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The per-request deadline expired.
    #[error("request deadline exceeded")]
    Timeout,

    /// A configured size ceiling was exceeded.
    #[error("request too large: {what} exceeds the limit of {limit} bytes")]
    RequestTooLarge { what: &'static str, limit: usize },

    /// The request violates the HTTP/1.1 line format.
    #[error("bad request: {reason}")]
    BadRequest { reason: String },

    /// An unexpected socket failure (reset, refused write, ...).
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// A failure escaping a user handler or a streaming body.
    #[error("handler error: {cause}")]
    Handler { cause: crate::protocol::BoxError },
}

impl HttpError {
    /// Creates a new BadRequest error
    pub fn bad_request<S: ToString>(reason: S) -> Self {
        Self::BadRequest { reason: reason.to_string() }
    }

    /// Creates a new RequestTooLarge error
    pub fn too_large(what: &'static str, limit: usize) -> Self {
        Self::RequestTooLarge { what, limit }
    }

    /// Creates a new Handler error
    pub fn handler(cause: crate::protocol::BoxError) -> Self {
        Self::Handler { cause }
    }

    /// The status for the one-shot error response, when the connection is
    /// still in a pre-response state. `None` means close without responding.
    pub fn response_status(&self) -> Option<StatusCode> {
        match self {
            HttpError::Timeout => Some(StatusCode::REQUEST_TIMEOUT),
            HttpError::RequestTooLarge { .. } => Some(StatusCode::PAYLOAD_TOO_LARGE),
            HttpError::BadRequest { .. } => Some(StatusCode::BAD_REQUEST),
            HttpError::Handler { .. } => Some(StatusCode::INTERNAL_SERVER_ERROR),
            HttpError::ConnectionClosed | HttpError::Io { .. } => None,
        }
    }
}
