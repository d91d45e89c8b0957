use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use colloquy::audio::codec::AudioBuffer;
use colloquy::audio::playback::{CpalOutput, PlaybackScheduler};
use colloquy::audio::{CapturePipeline, PLAYBACK_SAMPLE_RATE};
use colloquy::{Config, Conversation, SessionState, Speaker};

/// Colloquy - realtime voice conversation client
#[derive(Parser)]
#[command(name = "colloquy", version, about)]
struct Cli {
    /// Model identifier for the realtime service
    #[arg(long, env = "COLLOQUY_MODEL")]
    model: Option<String>,

    /// Voice identity for spoken replies
    #[arg(long, env = "COLLOQUY_VOICE")]
    voice: Option<String>,

    /// System instruction for the model
    #[arg(long)]
    system_instruction: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,colloquy=info",
        1 => "info,colloquy=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
        };
    }

    let mut config = Config::from_env();
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(voice) = cli.voice {
        config.voice = voice;
    }
    if let Some(instruction) = cli.system_instruction {
        config.system_instruction = instruction;
    }

    tracing::info!(model = %config.model, voice = %config.voice, "starting conversation");

    let mut conversation = Conversation::new(config);
    let mut watch = conversation.start().await?;

    println!("Conversation started - press Ctrl-C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
            state = watch.changed() => match state {
                Some(SessionState::Active) => println!("Listening..."),
                Some(SessionState::Closed) | None => break,
                Some(_) => {}
            }
        }
    }

    conversation.stop().await;

    let transcript = watch.transcript();
    if transcript.is_empty() {
        println!("\nNo turns were completed.");
    } else {
        println!("\n--- Transcript ---");
        for entry in transcript {
            let speaker = match entry.speaker {
                Speaker::User => "You",
                Speaker::Model => "Model",
            };
            println!("{speaker}: {}", entry.text);
        }
    }

    if let Some(error) = watch.last_error() {
        anyhow::bail!(error);
    }

    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (frame_tx, mut frame_rx) = tokio::sync::mpsc::channel(8);
    let mut capture = CapturePipeline::new()?;
    capture.start(frame_tx)?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    let deadline = tokio::time::sleep(Duration::from_secs(duration));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => break,
            Some(frame) = frame_rx.recv() => {
                let energy = calculate_rms(&frame);
                let peak = frame.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

                // Visual meter
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let meter_len = (energy * 100.0).min(50.0) as usize;
                let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

                println!("RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]");
            }
        }
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let (output, _finished_rx) = CpalOutput::new()?;
    let mut scheduler = PlaybackScheduler::new(output);

    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let num_samples = (PLAYBACK_SAMPLE_RATE as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    let buffer = AudioBuffer {
        samples,
        sample_rate: PLAYBACK_SAMPLE_RATE,
        channels: 1,
    };

    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", buffer.samples.len());
    scheduler.schedule(&buffer);

    tokio::time::sleep(Duration::from_millis(2200)).await;
    scheduler.stop();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}
