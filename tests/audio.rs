//! Audio pipeline integration tests
//!
//! Exercises the codec and the playback scheduler without audio hardware.

use std::sync::{Arc, Mutex};

use colloquy::audio::codec::{self, AudioBuffer};
use colloquy::audio::playback::{OutputSink, PlaybackScheduler, SourceId};
use colloquy::audio::{CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};

/// Sink that records scheduling calls against a manual clock
#[derive(Clone, Default)]
struct RecordingSink {
    clock: Arc<Mutex<f64>>,
    started: Arc<Mutex<Vec<(SourceId, f64, f64)>>>,
    stop_all_calls: Arc<Mutex<u32>>,
}

impl RecordingSink {
    fn starts(&self) -> Vec<(SourceId, f64, f64)> {
        self.started.lock().unwrap().clone()
    }

    fn set_clock(&self, secs: f64) {
        *self.clock.lock().unwrap() = secs;
    }

    fn stop_all_count(&self) -> u32 {
        *self.stop_all_calls.lock().unwrap()
    }
}

impl OutputSink for RecordingSink {
    fn now(&self) -> f64 {
        *self.clock.lock().unwrap()
    }

    fn start(&mut self, id: SourceId, buffer: &AudioBuffer, at_secs: f64) {
        self.started
            .lock()
            .unwrap()
            .push((id, at_secs, buffer.duration()));
    }

    fn stop_all(&mut self) {
        *self.stop_all_calls.lock().unwrap() += 1;
    }
}

/// Buffer of the given duration at the playback rate
fn chunk(secs: f64) -> AudioBuffer {
    let samples = (secs * f64::from(PLAYBACK_SAMPLE_RATE)) as usize;
    AudioBuffer {
        samples: vec![0.0; samples],
        sample_rate: PLAYBACK_SAMPLE_RATE,
        channels: 1,
    }
}

#[test]
fn test_steady_stream_has_no_gaps() {
    let sink = RecordingSink::default();
    let mut scheduler = PlaybackScheduler::new(sink.clone());

    let durations = [0.1, 0.2, 0.05, 0.3, 0.15];
    for secs in durations {
        scheduler.schedule(&chunk(secs));
    }

    let starts = sink.starts();
    assert_eq!(starts.len(), durations.len());

    // Start times are monotonically non-decreasing and each chunk begins
    // exactly where the previous one ends.
    let mut expected = 0.0;
    for (i, (_, at, duration)) in starts.iter().enumerate() {
        assert!(
            (at - expected).abs() < 1e-9,
            "chunk {i} started at {at}, expected {expected}"
        );
        expected = at + duration;
    }
    assert!((scheduler.next_start_time() - expected).abs() < 1e-9);
}

#[test]
fn test_bursty_arrivals_still_sequential() {
    let sink = RecordingSink::default();
    let mut scheduler = PlaybackScheduler::new(sink.clone());

    // First chunk scheduled, then the clock runs past its end before the
    // next burst arrives: the late chunks start at "now", not in the past.
    scheduler.schedule(&chunk(0.1));
    sink.set_clock(0.5);
    scheduler.schedule(&chunk(0.1));
    scheduler.schedule(&chunk(0.1));

    let starts = sink.starts();
    assert!((starts[0].1 - 0.0).abs() < 1e-9);
    assert!((starts[1].1 - 0.5).abs() < 1e-9);
    assert!((starts[2].1 - 0.6).abs() < 1e-9);
}

#[test]
fn test_interruption_empties_live_set_and_resets_cursor() {
    let sink = RecordingSink::default();
    let mut scheduler = PlaybackScheduler::new(sink.clone());

    for _ in 0..4 {
        scheduler.schedule(&chunk(0.2));
    }
    assert_eq!(scheduler.live_count(), 4);

    scheduler.interrupt();

    assert_eq!(scheduler.live_count(), 0);
    assert!((scheduler.next_start_time() - 0.0).abs() < f64::EPSILON);
    assert_eq!(sink.stop_all_count(), 1);
}

#[test]
fn test_interruption_with_empty_live_set() {
    let sink = RecordingSink::default();
    let mut scheduler = PlaybackScheduler::new(sink.clone());

    // Nothing live; stopping must not fail.
    scheduler.interrupt();

    assert_eq!(scheduler.live_count(), 0);
    assert!((scheduler.next_start_time() - 0.0).abs() < f64::EPSILON);
}

#[test]
fn test_handle_removed_exactly_once() {
    let sink = RecordingSink::default();
    let mut scheduler = PlaybackScheduler::new(sink);

    let first = scheduler.schedule(&chunk(0.1));
    let second = scheduler.schedule(&chunk(0.1));

    // Natural completion removes the handle.
    scheduler.on_finished(first);
    assert!(!scheduler.is_live(first));
    assert!(scheduler.is_live(second));

    // The interruption sweep takes the other; a late completion notice for
    // either handle is then a no-op.
    scheduler.interrupt();
    scheduler.on_finished(first);
    scheduler.on_finished(second);
    assert_eq!(scheduler.live_count(), 0);
}

#[test]
fn test_scheduling_resumes_after_interruption() {
    let sink = RecordingSink::default();
    let mut scheduler = PlaybackScheduler::new(sink.clone());

    scheduler.schedule(&chunk(0.5));
    sink.set_clock(0.2);
    scheduler.interrupt();

    // The next turn's audio starts at the clock, not after the flushed tail.
    scheduler.schedule(&chunk(0.1));
    let starts = sink.starts();
    assert!((starts[1].1 - 0.2).abs() < 1e-9);
}

#[test]
fn test_codec_roundtrip_within_quantization_error() {
    let original: Vec<f32> = (0..CAPTURE_SAMPLE_RATE as usize / 10)
        .map(|i| {
            let t = i as f32 / CAPTURE_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.8
        })
        .collect();

    let blob = codec::encode(&original);
    let bytes = codec::decode(&blob.data);
    let buffer = codec::decode_audio_data(&bytes, CAPTURE_SAMPLE_RATE, 1);

    assert_eq!(buffer.samples.len(), original.len());
    for (decoded, original) in buffer.samples.iter().zip(&original) {
        assert!((decoded - original).abs() <= 1.0 / 32768.0);
    }
}

#[test]
fn test_codec_declares_capture_rate() {
    let blob = codec::encode(&[0.0; 8]);
    assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
}

#[test]
fn test_truncated_payload_degrades_to_shorter_buffer() {
    let blob = codec::encode(&[0.25, -0.25]);
    let mut bytes = codec::decode(&blob.data);
    bytes.pop();

    let buffer = codec::decode_audio_data(&bytes, CAPTURE_SAMPLE_RATE, 1);
    assert_eq!(buffer.samples.len(), 1);
}

#[test]
fn test_garbage_payload_degrades_to_silence() {
    let bytes = codec::decode("@@not-base64@@");
    assert!(bytes.is_empty());

    let buffer = codec::decode_audio_data(&bytes, PLAYBACK_SAMPLE_RATE, 1);
    assert!(buffer.is_empty());
    assert!((buffer.duration() - 0.0).abs() < f64::EPSILON);
}
