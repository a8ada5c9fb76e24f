//! Error types for the sync server.

use qbsync_protocol::{CodecError, ErrorInfo};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Why a ticket could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    /// The ticket was never issued or has been closed.
    NotFound,
    /// The session outlived its time-to-live.
    Expired,
    /// The request is out of order for this session.
    ProtocolViolation,
}

impl fmt::Display for SessionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionErrorKind::NotFound => "session not found",
            SessionErrorKind::Expired => "session expired",
            SessionErrorKind::ProtocolViolation => "protocol violation",
        })
    }
}

/// Errors raised by a session or event store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend did not answer in time.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Credentials did not match.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Ticket lookup or sequencing failed.
    #[error("{kind}: ticket {ticket:?}")]
    Session {
        /// What went wrong.
        kind: SessionErrorKind,
        /// The offending ticket.
        ticket: String,
    },

    /// QuickBooks reported a non-zero status.
    #[error("QuickBooks error {}: {}", .0.code, .0.message)]
    Domain(ErrorInfo),

    /// A store backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Encoding or decoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Creates a session error.
    pub fn session(kind: SessionErrorKind, ticket: impl Into<String>) -> Self {
        Self::Session {
            kind,
            ticket: ticket.into(),
        }
    }

    /// Returns the session error kind, if this is one.
    pub fn session_kind(&self) -> Option<SessionErrorKind> {
        match self {
            ServerError::Session { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns true if the peer caused the error.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidCredentials
                | ServerError::Session { .. }
                | ServerError::Domain(_)
                | ServerError::Codec(CodecError::Parse(_))
        )
    }

    /// Returns true if the server (or one of its stores) is at fault.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ServerError::Store(_) | ServerError::Config(_) | ServerError::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbsync_protocol::ParseError;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidCredentials.is_client_error());
        assert!(ServerError::session(SessionErrorKind::NotFound, "t").is_client_error());
        assert!(ServerError::Codec(ParseError::new("bad", "<").into()).is_client_error());
        assert!(ServerError::Store(StoreError::Unavailable("down".into())).is_server_error());
        assert!(!ServerError::Internal("oops".into()).is_client_error());
    }

    #[test]
    fn error_display() {
        let err = ServerError::session(SessionErrorKind::Expired, "abc");
        assert_eq!(err.to_string(), "session expired: ticket \"abc\"");
        assert_eq!(err.session_kind(), Some(SessionErrorKind::Expired));

        let err = ServerError::Domain(ErrorInfo {
            code: "3120".into(),
            message: "Object not found".into(),
            severity: "Error".into(),
        });
        assert!(err.to_string().contains("3120"));

        let err = ServerError::from(StoreError::Timeout(Duration::from_millis(5)));
        assert!(err.to_string().contains("5ms"));
    }
}
