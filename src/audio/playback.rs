//! Gapless playback scheduling
//!
//! Decoded reply chunks arrive in bursts; the scheduler lines them up
//! back-to-back on the output clock so playback has no gap and no overlap.
//! The cursor only moves forward, except on barge-in interruption, when
//! every live source stops and the cursor resets.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use tokio::sync::mpsc;

use super::codec::AudioBuffer;
use crate::{Error, Result};

/// Sample rate for playback (matches the service's audio replies)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Identifier for a scheduled playback source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u64);

/// Where scheduled buffers actually go
///
/// The output device implements this; tests drive a scripted sink with a
/// manual clock.
pub trait OutputSink: Send {
    /// Current position of the output clock in seconds
    fn now(&self) -> f64;

    /// Begin playing `buffer` at `at_secs` on the output clock
    fn start(&mut self, id: SourceId, buffer: &AudioBuffer, at_secs: f64);

    /// Stop every active source immediately
    ///
    /// Stopping a source that already finished is a no-op.
    fn stop_all(&mut self);
}

/// Schedules decoded buffers for strictly sequential playback
pub struct PlaybackScheduler<S> {
    sink: S,
    next_start_time: f64,
    live: HashSet<SourceId>,
    next_id: u64,
}

impl<S: OutputSink> PlaybackScheduler<S> {
    /// Create a scheduler over an output sink
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            next_start_time: 0.0,
            live: HashSet::new(),
            next_id: 0,
        }
    }

    /// Schedule a buffer to play immediately after everything already queued
    ///
    /// Returns the handle of the scheduled source, now in the live set.
    pub fn schedule(&mut self, buffer: &AudioBuffer) -> SourceId {
        let start_at = self.next_start_time.max(self.sink.now());
        let id = SourceId(self.next_id);
        self.next_id += 1;

        self.sink.start(id, buffer, start_at);
        self.next_start_time = start_at + buffer.duration();
        self.live.insert(id);

        tracing::trace!(
            id = id.0,
            start_at,
            duration = buffer.duration(),
            "chunk scheduled"
        );
        id
    }

    /// Remove a naturally finished source from the live set
    ///
    /// A source already removed by an interruption sweep is ignored, so each
    /// handle leaves the set exactly once.
    pub fn on_finished(&mut self, id: SourceId) {
        self.live.remove(&id);
    }

    /// Barge-in: stop every live source, clear the set, reset the cursor
    pub fn interrupt(&mut self) {
        self.sink.stop_all();
        self.live.clear();
        self.next_start_time = 0.0;
        tracing::debug!("playback interrupted, queue flushed");
    }

    /// Teardown sweep, used on session close
    pub fn stop(&mut self) {
        self.interrupt();
    }

    /// Where the next chunk would start on the output clock
    #[must_use]
    pub const fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Number of sources currently live
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Whether a scheduled source is still live
    #[must_use]
    pub fn is_live(&self, id: SourceId) -> bool {
        self.live.contains(&id)
    }
}

/// A source being mixed by the device callback
struct ActiveSource {
    id: SourceId,
    start_sample: u64,
    pos: usize,
    samples: Vec<f32>,
}

/// State shared between the scheduler and the device callback
#[derive(Default)]
struct Mixer {
    sources: Vec<ActiveSource>,
}

/// Plays scheduled buffers on the default output device
///
/// The device stream lives on its own thread (cpal streams are not `Send`);
/// the callback mixes active sources against an absolute sample cursor and
/// marshals finished source ids back to the session loop over a channel.
pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    cursor: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CpalOutput {
    /// Open the default output device at the playback rate
    ///
    /// Returns the sink plus the channel on which naturally finished source
    /// ids arrive; the session loop drains it into the scheduler.
    ///
    /// # Errors
    ///
    /// Returns error if no output device or configuration is usable
    pub fn new() -> Result<(Self, mpsc::Receiver<SourceId>)> {
        let (finished_tx, finished_rx) = mpsc::channel(64);
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let cursor = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();
        let thread_mixer = Arc::clone(&mixer);
        let thread_cursor = Arc::clone(&cursor);
        let thread_stop = Arc::clone(&stop);

        let thread = std::thread::spawn(move || {
            run_output_stream(
                &thread_mixer,
                &thread_cursor,
                &thread_stop,
                finished_tx,
                &ready_tx,
            );
        });

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => Ok((
                Self {
                    mixer,
                    cursor,
                    stop,
                    thread: Some(thread),
                },
                finished_rx,
            )),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                stop.store(true, Ordering::SeqCst);
                let _ = thread.join();
                Err(Error::Audio(
                    "timed out waiting for output stream".to_string(),
                ))
            }
        }
    }

    /// Release the output device
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            tracing::debug!("audio playback stopped");
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

impl OutputSink for CpalOutput {
    #[allow(clippy::cast_precision_loss)]
    fn now(&self) -> f64 {
        self.cursor.load(Ordering::Relaxed) as f64 / f64::from(PLAYBACK_SAMPLE_RATE)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn start(&mut self, id: SourceId, buffer: &AudioBuffer, at_secs: f64) {
        let start_sample = (at_secs * f64::from(PLAYBACK_SAMPLE_RATE)) as u64;

        // Buffers are declared at the playback rate; a mismatched declaration
        // plays at the device rate rather than being resampled.
        let samples = if buffer.channels > 1 {
            buffer
                .samples
                .chunks(usize::from(buffer.channels))
                .map(|frame| {
                    let left = frame[0];
                    let right = frame.get(1).copied().unwrap_or(left);
                    f32::midpoint(left, right)
                })
                .collect()
        } else {
            buffer.samples.clone()
        };

        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.sources.push(ActiveSource {
                id,
                start_sample,
                pos: 0,
                samples,
            });
        }
    }

    fn stop_all(&mut self) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.sources.clear();
        }
    }
}

/// Build and drive the output stream until the stop flag is set
fn run_output_stream(
    mixer: &Arc<Mutex<Mixer>>,
    cursor: &Arc<AtomicU64>,
    stop: &Arc<AtomicBool>,
    finished: mpsc::Sender<SourceId>,
    ready: &std::sync::mpsc::Sender<Result<()>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready.send(Err(Error::Audio("no output device available".to_string())));
        return;
    };

    let supported_config = device
        .supported_output_configs()
        .ok()
        .and_then(|mut configs| {
            configs.find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
        });

    let Some(supported_config) = supported_config else {
        let _ = ready.send(Err(Error::Audio(
            "no suitable output config found".to_string(),
        )));
        return;
    };

    let config = supported_config
        .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
        .config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = PLAYBACK_SAMPLE_RATE,
        channels = config.channels,
        "audio playback initialized"
    );

    let callback_mixer = Arc::clone(mixer);
    let callback_cursor = Arc::clone(cursor);

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let Ok(mut mixer) = callback_mixer.lock() else {
                return;
            };

            for frame in data.chunks_mut(channels) {
                let t = callback_cursor.fetch_add(1, Ordering::Relaxed);
                let mut sample = 0.0f32;

                for source in &mut mixer.sources {
                    if t >= source.start_sample && source.pos < source.samples.len() {
                        sample += source.samples[source.pos];
                        source.pos += 1;
                    }
                }

                for out in frame.iter_mut() {
                    *out = sample;
                }
            }

            // Drained sources leave the mix; their ids are marshaled to the
            // session thread, which owns the live-set bookkeeping.
            mixer.sources.retain(|source| {
                if source.pos >= source.samples.len() {
                    let _ = finished.try_send(source.id);
                    false
                } else {
                    true
                }
            });
        },
        |err| {
            tracing::error!(error = %err, "audio playback error");
        },
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(Error::Audio(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(Error::Audio(e.to_string())));
        return;
    }

    let _ = ready.send(Ok(()));

    while !stop.load(Ordering::SeqCst) {
        std::thread::park_timeout(Duration::from_millis(50));
    }

    drop(stream);
}
