//! Error types for the conversation client

use thiserror::Error;

/// Result type alias for conversation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during a voice conversation
#[derive(Debug, Error)]
pub enum Error {
    /// Microphone access denied or the input stream was rejected
    #[error("microphone permission denied: {0}")]
    Permission(String),

    /// No API credential configured
    #[error("missing API credential (set GEMINI_API_KEY)")]
    MissingCredential,

    /// Transport failed to open
    #[error("transport open failed: {0}")]
    TransportOpen(String),

    /// Transport error mid-session
    #[error("transport error: {0}")]
    Transport(String),

    /// Transport closed by the remote peer
    #[error("transport closed by peer")]
    ClosedByPeer,

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Malformed inbound audio payload
    #[error("decode error: {0}")]
    Decode(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for unexpected failures
    #[error("unknown error: {0}")]
    Unknown(String),
}
