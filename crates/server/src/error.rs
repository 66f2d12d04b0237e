use thiserror::Error;

use crate::settings::SettingsError;

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer closed the connection")]
    Disconnected,

    #[error("login timed out")]
    LoginTimeout,

    #[error("login attempts exhausted")]
    LoginAttemptsExhausted,

    #[error("liveness probe went unanswered")]
    ProbeFailed,

    #[error("share payload ended after {received} of {expected} bytes")]
    LengthMismatch { expected: usize, received: usize },

    #[error("share receipt never confirmed")]
    UnconfirmedShare,

    #[error("server shutting down")]
    Shutdown,
}

impl SessionError {
    /// Whether this termination behaves like a dead transport. Sessions
    /// announce the departure of a peer that went away mid-conversation,
    /// but not one that was removed deliberately. A length mismatch
    /// counts: it means the stream hit EOF partway through a payload.
    pub fn is_transport_death(&self) -> bool {
        matches!(
            self,
            SessionError::Io(_)
                | SessionError::Disconnected
                | SessionError::ProbeFailed
                | SessionError::LengthMismatch { .. }
        )
    }
}

/// Errors from running the connection engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),
}
