//! Session lifecycle and event routing
//!
//! One session per conversation attempt. The session task is the single
//! logical thread of the pipeline: captured frames, server events, and
//! playback completions all marshal into its select loop, and every state
//! transition happens there. `Conversation` is what the UI boundary calls.

pub mod transcript;

use std::sync::{Arc, RwLock};
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::capture::CapturePipeline;
use crate::audio::codec;
use crate::audio::playback::{CpalOutput, OutputSink, PlaybackScheduler, SourceId};
use crate::transport::{LiveTransport, ServerEvent, SessionConfig, Transport};
use crate::{Config, Error, Result};

pub use transcript::{Speaker, TranscriptAggregator, TranscriptEntry};

/// Depth of the capture frame channel; beyond this frames drop
const FRAME_DEPTH: usize = 8;

/// Lifecycle state of a conversation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session activity
    #[default]
    Idle,
    /// Transport opening, devices acquired
    Connecting,
    /// Streaming both directions
    Active,
    /// Torn down; terminal for this session instance
    Closed,
}

/// Read-only view of a session for the UI boundary
#[derive(Debug, Clone)]
pub struct SessionWatch {
    state: watch::Receiver<SessionState>,
    last_error: watch::Receiver<Option<String>>,
    interrupted_at: watch::Receiver<Option<Instant>>,
    transcript: Arc<RwLock<TranscriptAggregator>>,
}

impl SessionWatch {
    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Most recent error message, if any
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    /// When the service last barged in on the current reply
    ///
    /// Set while an interruption is pending, cleared on turn completion and
    /// teardown; only meaningful while the session is `Active`.
    #[must_use]
    pub fn interrupted_at(&self) -> Option<Instant> {
        *self.interrupted_at.borrow()
    }

    /// Snapshot of the committed transcript log
    #[must_use]
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript
            .read()
            .map(|log| log.entries().to_vec())
            .unwrap_or_default()
    }

    /// Wait for the next state change
    ///
    /// Returns `None` once the session is gone.
    pub async fn changed(&mut self) -> Option<SessionState> {
        self.state.changed().await.ok()?;
        Some(*self.state.borrow())
    }
}

/// Why the session loop ended
enum CloseReason {
    /// Explicit stop request
    Stopped,
    /// The peer closed the channel
    PeerClosed,
    /// Fatal error with a user-visible message
    Fatal(String),
}

/// One conversation attempt, from connect to teardown
pub struct Session<T, S> {
    transport: T,
    scheduler: PlaybackScheduler<S>,
    capture: Option<CapturePipeline>,
    transcript: Arc<RwLock<TranscriptAggregator>>,
    state_tx: watch::Sender<SessionState>,
    error_tx: watch::Sender<Option<String>>,
    interrupted_tx: watch::Sender<Option<Instant>>,
    frame_tx: mpsc::Sender<Vec<f32>>,
    frame_rx: mpsc::Receiver<Vec<f32>>,
    finished_rx: mpsc::Receiver<SourceId>,
    stop_rx: mpsc::Receiver<()>,
}

impl<T: Transport, S: OutputSink> Session<T, S> {
    /// Assemble a session from its parts
    ///
    /// `capture` is `None` when no microphone is attached (tests drive the
    /// frame channel directly). Returns the session, its watch view, and the
    /// stop signal sender.
    pub fn new(
        transport: T,
        sink: S,
        capture: Option<CapturePipeline>,
        finished_rx: mpsc::Receiver<SourceId>,
    ) -> (Self, SessionWatch, mpsc::Sender<()>) {
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (error_tx, error_rx) = watch::channel(None);
        let (interrupted_tx, interrupted_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_DEPTH);
        let transcript = Arc::new(RwLock::new(TranscriptAggregator::new()));

        let watch = SessionWatch {
            state: state_rx,
            last_error: error_rx,
            interrupted_at: interrupted_rx,
            transcript: Arc::clone(&transcript),
        };

        (
            Self {
                transport,
                scheduler: PlaybackScheduler::new(sink),
                capture,
                transcript,
                state_tx,
                error_tx,
                interrupted_tx,
                frame_tx,
                frame_rx,
                finished_rx,
                stop_rx,
            },
            watch,
            stop_tx,
        )
    }

    /// Sender feeding captured frames into the session loop
    ///
    /// Each frame is encoded and sent in capture order.
    #[must_use]
    pub fn frame_sender(&self) -> mpsc::Sender<Vec<f32>> {
        self.frame_tx.clone()
    }

    /// Run the session to completion
    ///
    /// Connects, streams, and routes events until stopped, a fatal error, or
    /// peer close. Always lands in `Closed` with every resource released.
    pub async fn run(mut self) {
        self.set_state(SessionState::Connecting);

        let opened = tokio::select! {
            opened = self.transport.open() => Some(opened),
            _ = self.stop_rx.recv() => None,
        };

        let mut events = match opened {
            Some(Ok(events)) => events,
            Some(Err(e)) => {
                tracing::error!(error = %e, "failed to open transport");
                self.fail(&format!("Failed to start conversation: {e}"));
                self.teardown();
                return;
            }
            // Stop raced the connect; finish with a full teardown rather
            // than leaving a half-open session behind.
            None => {
                self.teardown();
                return;
            }
        };

        if let Some(capture) = self.capture.as_mut() {
            let frames = self.frame_tx.clone();
            if let Err(e) = capture.start(frames) {
                tracing::error!(error = %e, "failed to start capture");
                self.fail(&format!("Failed to start conversation: {e}"));
                self.teardown();
                return;
            }
        }

        self.set_state(SessionState::Active);
        tracing::info!("session active, listening");

        let reason = loop {
            let tick = tokio::select! {
                _ = self.stop_rx.recv() => Tick::Stop,
                event = events.recv() => Tick::Event(event),
                Some(frame) = self.frame_rx.recv() => Tick::Frame(frame),
                Some(id) = self.finished_rx.recv() => Tick::Finished(id),
            };

            match tick {
                Tick::Stop => break CloseReason::Stopped,
                Tick::Event(None) => break CloseReason::PeerClosed,
                Tick::Event(Some(event)) => {
                    if let Some(reason) = self.handle_event(event) {
                        break reason;
                    }
                }
                Tick::Frame(frame) => self.transport.send(codec::encode(&frame)),
                Tick::Finished(id) => self.scheduler.on_finished(id),
            }
        };

        match reason {
            CloseReason::Stopped => tracing::info!("conversation stopped"),
            CloseReason::PeerClosed => {
                tracing::info!(reason = %Error::ClosedByPeer, "conversation ended");
            }
            CloseReason::Fatal(message) => {
                tracing::error!(message = %message, "conversation failed");
                self.fail(&message);
            }
        }

        self.teardown();
    }

    /// Route one server event; returns a close reason for fatal variants
    fn handle_event(&mut self, event: ServerEvent) -> Option<CloseReason> {
        match event {
            ServerEvent::AudioChunk {
                data,
                rate,
                channels,
            } => {
                let buffer = codec::decode_audio_data(&data, rate, channels);
                if buffer.is_empty() {
                    // Malformed chunk degrades to silence; the session continues.
                    tracing::warn!(error = %Error::Decode("empty audio chunk".to_string()), "skipping chunk");
                } else {
                    self.scheduler.schedule(&buffer);
                }
                None
            }
            ServerEvent::InputTranscript { text } => {
                if let Ok(mut log) = self.transcript.write() {
                    log.push_input(&text);
                }
                None
            }
            ServerEvent::OutputTranscript { text } => {
                if let Ok(mut log) = self.transcript.write() {
                    log.push_output(&text);
                }
                None
            }
            ServerEvent::TurnComplete => {
                let _ = self.interrupted_tx.send(None);
                if let Ok(mut log) = self.transcript.write() {
                    for entry in log.commit_turn() {
                        tracing::info!(speaker = ?entry.speaker, text = %entry.text, "turn committed");
                    }
                }
                None
            }
            ServerEvent::Interrupted => {
                self.scheduler.interrupt();
                let _ = self.interrupted_tx.send(Some(Instant::now()));
                None
            }
            ServerEvent::Error { message } => Some(CloseReason::Fatal(format!(
                "Conversation error: {message} Please try again."
            ))),
            ServerEvent::Closed => Some(CloseReason::PeerClosed),
        }
    }

    /// Total teardown: idempotent, safe from any state including a
    /// partially-initialized connect
    fn teardown(&mut self) {
        // Capture disconnects before the state reaches Closed.
        if let Some(capture) = self.capture.as_mut() {
            capture.stop();
        }
        self.capture = None;

        self.transport.close();
        self.scheduler.stop();
        let _ = self.interrupted_tx.send(None);
        self.set_state(SessionState::Closed);
    }

    fn set_state(&self, state: SessionState) {
        let _ = self.state_tx.send(state);
    }

    fn fail(&self, message: &str) {
        let _ = self.error_tx.send(Some(message.to_string()));
    }
}

/// One iteration of the session loop
enum Tick {
    Stop,
    Event(Option<ServerEvent>),
    Frame(Vec<f32>),
    Finished(SourceId),
}

/// Running session bookkeeping held by the controller
struct ActiveSession {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
    watch: SessionWatch,
}

/// UI-facing controller owning at most one live session
///
/// Starting a new session always tears the previous one down first; two
/// sessions never compete for the microphone.
pub struct Conversation {
    config: Config,
    active: Option<ActiveSession>,
}

impl Conversation {
    /// Create a controller with the given configuration
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self {
            config,
            active: None,
        }
    }

    /// Start a fresh conversation session
    ///
    /// Acquires the microphone and output device, opens the transport, and
    /// spawns the session task. Any previous session is fully torn down
    /// first.
    ///
    /// # Errors
    ///
    /// Returns `MissingCredential` when no API key is configured (before any
    /// device is touched), or a device/transport error from setup. In every
    /// error case the controller stays idle and ready to retry.
    pub async fn start(&mut self) -> Result<SessionWatch> {
        self.stop().await;

        let credential = self
            .config
            .credential
            .clone()
            .ok_or(Error::MissingCredential)?;

        let capture = CapturePipeline::new()?;
        let (output, finished_rx) = CpalOutput::new()?;
        let transport = LiveTransport::new(SessionConfig {
            credential,
            model: self.config.model.clone(),
            voice: self.config.voice.clone(),
            system_instruction: self.config.system_instruction.clone(),
        });

        let (session, watch, stop_tx) = Session::new(transport, output, Some(capture), finished_rx);
        let task = tokio::spawn(session.run());

        self.active = Some(ActiveSession {
            stop_tx,
            task,
            watch: watch.clone(),
        });
        Ok(watch)
    }

    /// Stop the current session, if any, and wait for its teardown
    ///
    /// Safe to call repeatedly, with no session running, or while a connect
    /// is still pending.
    pub async fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.stop_tx.send(()).await;
            let _ = active.task.await;
        }
    }

    /// View of the current session, if one is running
    #[must_use]
    pub fn watch(&self) -> Option<SessionWatch> {
        self.active.as_ref().map(|active| active.watch.clone())
    }
}
