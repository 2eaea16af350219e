use thiserror::Error;

/// Failures surfaced by the streaming session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// Establishing or keeping the connection failed.  Forces `Stopped`.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Every prompt weight is zero (or every active prompt was filtered).
    #[error("There needs to be at least one active prompt to play.")]
    NoActivePrompts,

    /// The session manager task is gone.
    #[error("session manager is not running")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::Connection(e.to_string())
    }
}
