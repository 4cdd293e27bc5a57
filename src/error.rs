//! Error taxonomy for the server core.
//!
//! The five kinds distinguished here — Transport, Protocol, Policy, Handler, Fatal — map
//! directly onto [`RaskError`]'s variants, and each variant is paired with the action the worker
//! takes in response (close silently, respond then maybe close, respond and keep the connection,
//! or propagate to the caller of [`crate::server::Server::run`]).

use std::fmt;
use std::io;

use crate::http::status::Status;
use crate::http::ParseError;

/// The single error type that crosses component boundaries inside the server core.
#[derive(Debug, thiserror::Error)]
pub enum RaskError {
    /// The connection closed, reset, timed out, or failed its TLS handshake. No response is
    /// attempted; the client is simply dropped.
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    /// A malformed request line, header block, or chunk framing. The worker responds with the
    /// paired status and closes the connection, since the parser's position in the stream can no
    /// longer be trusted.
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// A well-formed request that the server's policy refuses: path traversal, a disallowed
    /// directory listing, an upload over the configured limit, or a method the route doesn't
    /// support. The connection stays open if HTTP framing allows it.
    #[error("policy violation: {status} {message}")]
    Policy {
        /// Status to send back to the client.
        status: Status,
        /// Human-readable detail, logged but not necessarily echoed verbatim to the client.
        message: String,
    },

    /// A condition raised by user handler code. Carries the status/message the handler
    /// explicitly chose to fail with (the "fail-with-code" signal); handler panics are
    /// caught one layer up and converted to this with a generic 500 message.
    #[error("handler error: {status} {message}")]
    Handler {
        /// Status to send back to the client.
        status: Status,
        /// Message logged (and, for non-5xx statuses, included in the response body).
        message: String,
    },

    /// Failure to bind a listen socket or spawn a worker thread. Propagated to the caller of
    /// `Server::run`; the process is expected to exit.
    #[error("fatal startup error: {0}")]
    Fatal(#[source] io::Error),
}

impl RaskError {
    /// A policy error shorthand.
    pub fn policy(status: Status, message: impl Into<String>) -> Self {
        RaskError::Policy {
            status,
            message: message.into(),
        }
    }

    /// The status code this error should be reported to the client as, if any. `Transport`
    /// errors have none — by the time one is raised, no response can reliably be written.
    pub fn status(&self) -> Option<Status> {
        match self {
            RaskError::Transport(_) | RaskError::Fatal(_) => None,
            RaskError::Protocol(parse_err) => Some(match parse_err {
                ParseError::Method => Status::BadRequest,
                ParseError::UnknownMethod => Status::MethodNotAllowed,
                ParseError::Target => Status::BadRequest,
                ParseError::Version => Status::HTTPVersionNotSupported,
                ParseError::HeaderName | ParseError::HeaderValue => Status::BadRequest,
                ParseError::NewLine => Status::BadRequest,
                ParseError::ChunkFraming => Status::BadRequest,
                ParseError::ContentLength => Status::BadRequest,
            }),
            RaskError::Policy { status, .. } => Some(*status),
            RaskError::Handler { status, .. } => Some(*status),
        }
    }

    /// Whether the connection should be closed after reporting this error, independent of
    /// whatever `Connection` header the request carried.
    pub fn forces_close(&self) -> bool {
        matches!(self, RaskError::Transport(_) | RaskError::Protocol(_))
    }
}

impl From<io::Error> for RaskError {
    fn from(err: io::Error) -> Self {
        RaskError::Transport(err)
    }
}

/// The structured "fail-with-code" signal handler code raises for conditions it
/// can't satisfy. A plain `Result::Err` of this type becomes exactly the response described.
#[derive(Debug, Clone)]
pub struct HandlerError {
    /// Status to report.
    pub status: Status,
    /// Message surfaced in the response body/log line.
    pub message: String,
}

impl HandlerError {
    /// Builds a handler error that will serialize to `status` with `message` as its body text.
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        HandlerError {
            status,
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<HandlerError> for RaskError {
    fn from(err: HandlerError) -> Self {
        RaskError::Handler {
            status: err.status,
            message: err.message,
        }
    }
}
