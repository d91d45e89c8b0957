//! Transport session to the remote conversational service
//!
//! The service is an opaque bidirectional stream: encoded audio frames go
//! out, tagged events come back. The `Transport` trait is the seam; `live`
//! carries the production WebSocket implementation, and tests script event
//! sequences deterministically.

mod live;

pub use live::LiveTransport;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;
use crate::audio::codec::EncodedBlob;

/// Configuration for one transport session
///
/// Response modality is audio and transcription is enabled for both
/// directions; those are fixed properties of the conversation pipeline.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// API credential
    pub credential: String,

    /// Model identifier
    pub model: String,

    /// Voice identity for audio replies
    pub voice: String,

    /// System instruction text
    pub system_instruction: String,
}

/// A tagged event delivered by the remote service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Audio payload for playback, already stripped of its text transform
    AudioChunk {
        /// Little-endian 16-bit PCM bytes
        data: Vec<u8>,
        /// Declared sample rate
        rate: u32,
        /// Declared channel count
        channels: u16,
    },

    /// Fragment of the user's speech transcription
    InputTranscript {
        /// Partial text, appended to the current turn's input buffer
        text: String,
    },

    /// Fragment of the model's speech transcription
    OutputTranscript {
        /// Partial text, appended to the current turn's output buffer
        text: String,
    },

    /// The current exchange turn is complete
    TurnComplete,

    /// The user began speaking over an in-progress reply
    Interrupted,

    /// Error reported by the service
    Error {
        /// Human-readable description
        message: String,
    },

    /// The channel was closed by the peer
    Closed,
}

/// Bidirectional logical channel to the remote service
#[async_trait]
pub trait Transport: Send {
    /// Open the channel; resolves once sends are accepted
    ///
    /// Returns the inbound event stream. Events arrive in delivery order.
    ///
    /// # Errors
    ///
    /// Returns error if the channel cannot be established
    async fn open(&mut self) -> Result<mpsc::Receiver<ServerEvent>>;

    /// Send one encoded audio frame, fire-and-forget
    ///
    /// Frames sent before the channel is open are dropped, consistent with
    /// the capture pipeline's no-retry policy.
    fn send(&self, blob: EncodedBlob);

    /// Close the channel
    ///
    /// Idempotent; safe to call repeatedly or before `open` resolves.
    fn close(&self);
}
