//! Audio pipeline
//!
//! PCM codec, microphone frame capture, and gapless playback scheduling.
//! Capture runs at 16kHz, playback at 24kHz; each leg keeps its own rate
//! end-to-end, nothing is resampled.

pub mod capture;
pub mod codec;
pub mod playback;

pub use capture::{CAPTURE_SAMPLE_RATE, CapturePipeline, FRAME_SAMPLES};
pub use codec::{AudioBuffer, EncodedBlob};
pub use playback::{CpalOutput, OutputSink, PLAYBACK_SAMPLE_RATE, PlaybackScheduler, SourceId};
