//! Colloquy - realtime voice conversation client for AI assistants
//!
//! Streams microphone audio to a remote conversational service and plays the
//! service's spoken replies back gaplessly, with barge-in interruption and a
//! turn-by-turn transcript.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Conversation                       │
//! │            start / stop / SessionWatch               │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Session loop                        │
//! │  mic frames → PCM encode → transport ⇄ remote svc   │
//! │  events → decode → playback scheduler │ transcript  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Capture runs at 16kHz, playback at 24kHz; each leg keeps its declared
//! rate end-to-end. All session state lives on one task - audio callbacks
//! and socket I/O marshal into it over channels.

pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{Conversation, Session, SessionState, SessionWatch, Speaker, TranscriptEntry};
pub use transport::{ServerEvent, SessionConfig, Transport};
