use crate::session::SessionState;
use thiserror::Error;

/// Errors surfaced by the session engine.
///
/// Payloads are plain strings so the error can be cloned into `error` events
/// and handed to every subscriber.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    /// Transport open, setup handshake or setup timeout failure.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// An inbound frame could not be understood. The frame is dropped.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A send was attempted while the session was not open.
    #[error("Session is not open (state: {0})")]
    NotOpen(SessionState),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}
