//! Microphone frame capture
//!
//! Owns the input device on a dedicated thread (cpal streams are not `Send`)
//! and delivers fixed-size sample frames to the session loop. Delivery is
//! fire-and-forget: a frame the consumer cannot take immediately is dropped,
//! never buffered for retry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Samples per delivered frame
pub const FRAME_SAMPLES: usize = 4096;

/// Captures fixed-size frames from the default input device
pub struct CapturePipeline {
    config: StreamConfig,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CapturePipeline {
    /// Acquire the default input device and probe a 16kHz mono configuration
    ///
    /// # Errors
    ///
    /// Returns error if no input device is available or no suitable
    /// configuration exists
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Permission(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(CAPTURE_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(CAPTURE_SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable input config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(CAPTURE_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = CAPTURE_SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    /// Start delivering frames on `frames`
    ///
    /// The stream is built on its own thread; this call returns once the
    /// stream is playing. Calling it while already capturing is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be built or started
    pub fn start(&mut self, frames: mpsc::Sender<Vec<f32>>) -> Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }

        self.stop.store(false, Ordering::SeqCst);
        let stop = Arc::clone(&self.stop);
        let config = self.config.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        let thread = std::thread::spawn(move || {
            run_input_stream(&config, frames, &stop, &ready_tx);
        });

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                self.thread = Some(thread);
                tracing::debug!("audio capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                self.stop.store(true, Ordering::SeqCst);
                let _ = thread.join();
                Err(Error::Audio(
                    "timed out waiting for input stream".to_string(),
                ))
            }
        }
    }

    /// Stop capture and release the input device
    ///
    /// Idempotent; safe to call when capture was never started.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            tracing::debug!("audio capture stopped");
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    /// Get the capture sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        CAPTURE_SAMPLE_RATE
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build and drive the input stream until the stop flag is set
fn run_input_stream(
    config: &StreamConfig,
    frames: mpsc::Sender<Vec<f32>>,
    stop: &Arc<AtomicBool>,
    ready: &std::sync::mpsc::Sender<Result<()>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready.send(Err(Error::Audio("no input device".to_string())));
        return;
    };

    // Hardware blocks rarely match the frame size; accumulate and emit
    // whole frames as they fill.
    let mut pending: Vec<f32> = Vec::with_capacity(FRAME_SAMPLES * 2);

    let stream = device.build_input_stream(
        config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            pending.extend_from_slice(data);
            while pending.len() >= FRAME_SAMPLES {
                let frame: Vec<f32> = pending.drain(..FRAME_SAMPLES).collect();
                // A full channel means the consumer is behind; the frame
                // drops rather than queueing.
                let _ = frames.try_send(frame);
            }
        },
        |err| {
            tracing::error!(error = %err, "audio capture error");
        },
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(Error::Permission(e.to_string())));
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
