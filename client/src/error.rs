//! Typed errors surfaced by the session and gateway.

use protocol::FrameError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RconError {
    /// Connection refused, reset, or a read/write failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The server sent bytes that could not be framed, repeatedly.
    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Fieldless mirror of [`RconError`] for callers that only branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    Protocol,
    AuthenticationFailed,
    Timeout,
    ConnectionClosed,
    NotAuthenticated,
    InvalidArgument,
}

impl RconError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RconError::Transport(_) => ErrorKind::Transport,
            RconError::Protocol(_) => ErrorKind::Protocol,
            RconError::AuthenticationFailed => ErrorKind::AuthenticationFailed,
            RconError::Timeout(_) => ErrorKind::Timeout,
            RconError::ConnectionClosed => ErrorKind::ConnectionClosed,
            RconError::NotAuthenticated => ErrorKind::NotAuthenticated,
            RconError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }

    /// Whether this error ends the session it came from.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::Timeout | ErrorKind::InvalidArgument | ErrorKind::NotAuthenticated
        )
    }
}
