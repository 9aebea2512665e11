//! Error types for ringquery

use crate::limiter::LimitError;
use std::fmt;

/// Result type alias for ringquery operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for ringquery
#[derive(Debug)]
pub enum Error {
    /// Tenant could not be resolved from the query context
    Unauthenticated(String),
    /// Malformed request (bad matchers, inverted time range, ...)
    InvalidRequest(String),
    /// A per-query resource limit was hit
    LimitExceeded(LimitError),
    /// The caller canceled the query
    Canceled,
    /// The query deadline elapsed
    Timeout,
    /// RPC failure talking to a replica
    Transport(tonic::Status),
    /// Ring state cannot serve the operation
    Ring(String),
    /// Too many replicas failed for the replication set to succeed
    QuorumNotReached {
        failures: usize,
        max_errors: usize,
        last: Box<Error>,
    },
    /// Configuration errors
    Config(String),
    /// Serialization errors
    Serialization(String),
    /// IO errors
    Io(std::io::Error),
    /// Internal error
    Internal(String),
}

impl Error {
    /// True for caller-initiated cancellation, which is never a replica's fault.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    /// Cancellation or an expired query deadline. Both come from the
    /// query's own context and are never counted against a replica.
    pub fn is_context_error(&self) -> bool {
        matches!(self, Error::Canceled | Error::Timeout)
    }

    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, Error::LimitExceeded(_))
    }

    /// Errors that fail the whole query no matter how many replicas are
    /// still able to answer.
    pub fn aborts_query(&self) -> bool {
        self.is_context_error() || self.is_limit_exceeded()
    }

    /// Short label used for telemetry attributes.
    pub fn class(&self) -> &'static str {
        match self {
            Error::Unauthenticated(_) => "unauthenticated",
            Error::InvalidRequest(_) => "invalid_request",
            Error::LimitExceeded(_) => "limit_exceeded",
            Error::Canceled => "canceled",
            Error::Timeout => "timeout",
            Error::Transport(_) => "transport",
            Error::Ring(_) => "ring",
            Error::QuorumNotReached { .. } => "quorum",
            Error::Config(_) => "config",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::LimitExceeded(e) => Some(e),
            Error::Transport(e) => Some(e),
            Error::QuorumNotReached { last, .. } => Some(last.as_ref()),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Unauthenticated(msg) => write!(f, "Unauthenticated: {}", msg),
            Error::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Error::LimitExceeded(e) => write!(f, "Limit exceeded: {}", e),
            Error::Canceled => write!(f, "Query canceled"),
            Error::Timeout => write!(f, "Query timed out"),
            Error::Transport(status) => {
                write!(f, "Transport error ({:?}): {}", status.code(), status.message())
            }
            Error::Ring(msg) => write!(f, "Ring error: {}", msg),
            Error::QuorumNotReached {
                failures,
                max_errors,
                last,
            } => write!(
                f,
                "Quorum not reached: {} replicas failed, at most {} tolerated: {}",
                failures, max_errors, last
            ),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<LimitError> for Error {
    fn from(e: LimitError) -> Self {
        Error::LimitExceeded(e)
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::Cancelled => Error::Canceled,
            _ => Error::Transport(status),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Error::InvalidRequest(e.to_string())
    }
}
