//! Tracker error types.

/// Errors that end an upstream session.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Connection refused, reset, timed out, or failed TLS.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Upstream closed the socket.
    #[error("Connection closed by upstream")]
    Closed,

    /// Outbound frame could not be encoded.
    #[error("Encode error: {0}")]
    Encode(String),

    /// Session state machine violation.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Missing or unusable credentials at startup.
    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    #[error(transparent)]
    Config(#[from] padretap_core::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for TrackerError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
