//! WebSocket transport to the realtime conversational endpoint
//!
//! Blocking socket I/O runs on a dedicated thread so the session loop never
//! blocks on the wire; outbound frames and inbound events cross over bounded
//! channels. No automatic reconnect: a broken channel surfaces as an error
//! and the operator restarts the conversation.

use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tungstenite::WebSocket;
use tungstenite::stream::MaybeTlsStream;

use super::{ServerEvent, SessionConfig, Transport};
use crate::audio::PLAYBACK_SAMPLE_RATE;
use crate::audio::codec::{self, EncodedBlob};
use crate::{Error, Result};

/// Realtime bidirectional streaming endpoint
const ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// How long to wait for the setup acknowledgment
const SETUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Socket read timeout while polling; paces the I/O loop
const READ_TIMEOUT: Duration = Duration::from_millis(20);

/// Depth of the outbound frame and inbound event channels
const CHANNEL_DEPTH: usize = 256;

type WsStream = WebSocket<MaybeTlsStream<TcpStream>>;

/// Production transport over the service's WebSocket protocol
pub struct LiveTransport {
    config: SessionConfig,
    outbound_tx: mpsc::Sender<EncodedBlob>,
    outbound_rx: Option<mpsc::Receiver<EncodedBlob>>,
    open: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl LiveTransport {
    /// Create a transport for one session
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_DEPTH);
        Self {
            config,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            open: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

#[async_trait]
impl Transport for LiveTransport {
    async fn open(&mut self) -> Result<mpsc::Receiver<ServerEvent>> {
        let outbound_rx = self
            .outbound_rx
            .take()
            .ok_or_else(|| Error::TransportOpen("transport already opened".to_string()))?;

        let (events_tx, events_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel();

        let config = self.config.clone();
        let open = Arc::clone(&self.open);
        let closed = Arc::clone(&self.closed);

        self.thread = Some(std::thread::spawn(move || {
            run_socket(&config, outbound_rx, &events_tx, &open, &closed, ready_tx);
        }));

        match ready_rx.await {
            Ok(Ok(())) => Ok(events_rx),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::TransportOpen(
                "transport thread exited before setup completed".to_string(),
            )),
        }
    }

    fn send(&self, blob: EncodedBlob) {
        // Pre-open or backlogged frames drop, never queue for retry.
        if !self.open.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.outbound_tx.try_send(blob);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Drop for LiveTransport {
    fn drop(&mut self) {
        self.close();
        // The I/O thread notices the flag within one read timeout and exits
        // on its own; nothing blocks here.
        self.thread.take();
    }
}

/// Drive the socket until closed by either side
fn run_socket(
    config: &SessionConfig,
    mut outbound: mpsc::Receiver<EncodedBlob>,
    events: &mpsc::Sender<ServerEvent>,
    open: &Arc<AtomicBool>,
    closed: &Arc<AtomicBool>,
    ready: oneshot::Sender<Result<()>>,
) {
    let mut socket = match connect(config) {
        Ok(socket) => socket,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(e) = send_setup(&mut socket, config) {
        let _ = ready.send(Err(e));
        return;
    }

    if let Err(e) = await_setup_complete(&mut socket, closed) {
        let _ = ready.send(Err(e));
        return;
    }

    open.store(true, Ordering::SeqCst);
    let _ = ready.send(Ok(()));
    tracing::debug!("transport open");

    loop {
        if closed.load(Ordering::SeqCst) {
            let _ = socket.close(None);
            break;
        }

        // Outbound: flush queued frames in capture order
        let mut send_failed = false;
        while let Ok(blob) = outbound.try_recv() {
            if let Err(e) = send_audio(&mut socket, &blob) {
                tracing::warn!(error = %e, "outbound send failed");
                let _ = events.blocking_send(ServerEvent::Error {
                    message: e.to_string(),
                });
                send_failed = true;
                break;
            }
        }
        if send_failed {
            break;
        }

        // Inbound: one read per cycle, bounded by the socket timeout
        match socket.read() {
            Ok(tungstenite::Message::Text(raw)) => {
                if !deliver(events, parse_server_message(raw.as_str())) {
                    break;
                }
            }
            Ok(tungstenite::Message::Binary(data)) => {
                if let Ok(raw) = String::from_utf8(data.to_vec()) {
                    if !deliver(events, parse_server_message(&raw)) {
                        break;
                    }
                }
            }
            Ok(tungstenite::Message::Close(_)) => {
                let _ = events.blocking_send(ServerEvent::Closed);
                break;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e)) if would_block(e) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                let _ = events.blocking_send(ServerEvent::Closed);
                break;
            }
            Err(e) => {
                let _ = events.blocking_send(ServerEvent::Error {
                    message: e.to_string(),
                });
                break;
            }
        }
    }

    let _ = socket.close(None);
    open.store(false, Ordering::SeqCst);
    tracing::debug!("transport thread exited");
}

/// Forward parsed events in order; false when the session side is gone
fn deliver(events: &mpsc::Sender<ServerEvent>, parsed: Vec<ServerEvent>) -> bool {
    for event in parsed {
        if events.blocking_send(event).is_err() {
            return false;
        }
    }
    true
}

/// Establish the TLS WebSocket connection
fn connect(config: &SessionConfig) -> Result<WsStream> {
    let mut endpoint =
        url::Url::parse(ENDPOINT).map_err(|e| Error::TransportOpen(e.to_string()))?;
    endpoint
        .query_pairs_mut()
        .append_pair("key", &config.credential);

    let (mut socket, response) =
        tungstenite::connect(endpoint.as_str()).map_err(|e| Error::TransportOpen(e.to_string()))?;
    tracing::debug!(status = %response.status(), "websocket connected");

    set_read_timeout(&mut socket, Some(READ_TIMEOUT))?;
    Ok(socket)
}

/// Apply a read timeout to the underlying TCP stream
fn set_read_timeout(socket: &mut WsStream, timeout: Option<Duration>) -> Result<()> {
    match socket.get_mut() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(timeout).map_err(Error::Io),
        MaybeTlsStream::NativeTls(stream) => {
            stream.get_ref().set_read_timeout(timeout).map_err(Error::Io)
        }
        _ => Ok(()),
    }
}

fn would_block(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// Send the session setup message
fn send_setup(socket: &mut WsStream, config: &SessionConfig) -> Result<()> {
    let message = SetupMessage {
        setup: Setup {
            model: format!("models/{}", config.model),
            generation_config: GenerationConfig {
                response_modalities: ["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: &config.voice,
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: &config.system_instruction,
                }],
            },
            input_audio_transcription: Empty {},
            output_audio_transcription: Empty {},
        },
    };

    let json = serde_json::to_string(&message)?;
    socket
        .send(tungstenite::Message::Text(json.into()))
        .map_err(|e| Error::TransportOpen(e.to_string()))
}

/// Block until the service acknowledges the setup, or time out
fn await_setup_complete(socket: &mut WsStream, closed: &Arc<AtomicBool>) -> Result<()> {
    let deadline = Instant::now() + SETUP_TIMEOUT;

    loop {
        if closed.load(Ordering::SeqCst) {
            return Err(Error::TransportOpen(
                "closed before setup completed".to_string(),
            ));
        }
        if Instant::now() > deadline {
            return Err(Error::TransportOpen(
                "timed out waiting for setup acknowledgment".to_string(),
            ));
        }

        match socket.read() {
            Ok(tungstenite::Message::Text(raw)) => {
                if is_setup_complete(raw.as_str()) {
                    return Ok(());
                }
            }
            Ok(tungstenite::Message::Binary(data)) => {
                if String::from_utf8(data.to_vec()).is_ok_and(|raw| is_setup_complete(&raw)) {
                    return Ok(());
                }
            }
            Ok(tungstenite::Message::Close(_)) => {
                return Err(Error::TransportOpen("closed during setup".to_string()));
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e)) if would_block(e) => {}
            Err(e) => return Err(Error::TransportOpen(e.to_string())),
        }
    }
}

/// Send one encoded audio frame as a realtime input message
fn send_audio(socket: &mut WsStream, blob: &EncodedBlob) -> Result<()> {
    let message = RealtimeInputMessage {
        realtime_input: RealtimeInput {
            audio: AudioPayload {
                data: &blob.data,
                mime_type: &blob.mime_type,
            },
        },
    };

    let json = serde_json::to_string(&message)?;
    socket
        .send(tungstenite::Message::Text(json.into()))
        .map_err(|e| Error::Transport(e.to_string()))
}

fn is_setup_complete(raw: &str) -> bool {
    serde_json::from_str::<ServerMessage>(raw).is_ok_and(|m| m.setup_complete.is_some())
}

/// Parse one wire message into events, preserving the protocol's field
/// order: audio parts, interruption, transcripts, turn completion.
fn parse_server_message(raw: &str) -> Vec<ServerEvent> {
    let message: ServerMessage = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "malformed server message, skipping");
            return Vec::new();
        }
    };

    let mut parsed = Vec::new();
    let Some(content) = message.server_content else {
        return parsed;
    };

    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if let Some(inline) = part.inline_data {
                let data = codec::decode(&inline.data);
                if data.is_empty() {
                    tracing::warn!("malformed audio part, skipping");
                    continue;
                }
                let (rate, channels) = parse_audio_mime(&inline.mime_type);
                parsed.push(ServerEvent::AudioChunk {
                    data,
                    rate,
                    channels,
                });
            }
        }
    }

    if content.interrupted {
        parsed.push(ServerEvent::Interrupted);
    }

    if let Some(transcription) = content.input_transcription {
        if !transcription.text.is_empty() {
            parsed.push(ServerEvent::InputTranscript {
                text: transcription.text,
            });
        }
    }

    if let Some(transcription) = content.output_transcription {
        if !transcription.text.is_empty() {
            parsed.push(ServerEvent::OutputTranscript {
                text: transcription.text,
            });
        }
    }

    if content.turn_complete {
        parsed.push(ServerEvent::TurnComplete);
    }

    parsed
}

/// Extract the declared rate from a tag like `audio/pcm;rate=24000`
fn parse_audio_mime(mime: &str) -> (u32, u16) {
    let rate = mime
        .split(';')
        .find_map(|part| part.trim().strip_prefix("rate="))
        .and_then(|rate| rate.parse().ok())
        .unwrap_or(PLAYBACK_SAMPLE_RATE);
    (rate, 1)
}

// Wire messages, camelCase JSON per the service protocol.

#[derive(Serialize)]
struct SetupMessage<'a> {
    setup: Setup<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: String,
    generation_config: GenerationConfig<'a>,
    system_instruction: Content<'a>,
    input_audio_transcription: Empty,
    output_audio_transcription: Empty,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'static str; 1],
    speech_config: SpeechConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig<'a> {
    voice_name: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Empty {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage<'a> {
    realtime_input: RealtimeInput<'a>,
}

#[derive(Serialize)]
struct RealtimeInput<'a> {
    audio: AudioPayload<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioPayload<'a> {
    data: &'a str,
    mime_type: &'a str,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
    turn_complete: bool,
    interrupted: bool,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ModelTurn {
    parts: Vec<Part>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Transcription {
    text: String,
}
