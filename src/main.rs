use std::io::Cursor;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

use sayboard::cache::{Pacer, PregenEvent, PregenPlan, bulk_populate};
use sayboard::playback::{PlaybackDevice, SpeakerDevice};
use sayboard::synthesis::{CommandEngine, HttpSynthesizer, LocalEngine};
use sayboard::{Admission, CacheStore, Config, LanguageMode, Soundboard, VoiceIdentity, Volume};

/// Sayboard - speak soundboard phrases from the command line
#[derive(Parser)]
#[command(name = "sayboard", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Speak a phrase
    Speak {
        /// Text to speak
        text: String,
        /// Voice: male, female, child or default
        #[arg(long)]
        voice: Option<String>,
        /// Volume, 0-100 or 0.0-1.0
        #[arg(long)]
        volume: Option<f32>,
        /// Language mode: english, filipino or bilingual
        #[arg(long)]
        language: Option<LanguageMode>,
    },
    /// Pre-generate cached audio for every phrase in a file (one per line)
    Pregen {
        /// Phrase file
        file: std::path::PathBuf,
        /// Voices to generate; repeat for several (default: all)
        #[arg(long = "voice")]
        voices: Vec<String>,
    },
    /// Inspect or clear the audio cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
    /// List voices of the local speech engine
    Voices,
    /// Test speaker output
    TestSpeaker,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Show entry count and total size
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List cached phrases, newest first
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove every cached phrase
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,sayboard=info",
        1 => "info,sayboard=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
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
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Speak {
            text,
            voice,
            volume,
            language,
        } => speak(&config, &text, voice.as_deref(), volume, language).await,
        Command::Pregen { file, voices } => pregen(&config, &file, &voices).await,
        Command::Cache { command } => cache(&config, &command),
        Command::Voices => list_voices().await,
        Command::TestSpeaker => test_speaker().await,
    }
}

async fn speak(
    config: &Config,
    text: &str,
    voice: Option<&str>,
    volume: Option<f32>,
    language: Option<LanguageMode>,
) -> anyhow::Result<()> {
    let board = Soundboard::from_config(config)?;

    let mut options = config.speak_options();
    if let Some(voice) = voice {
        options.voice = VoiceIdentity::normalize(voice);
    }
    if let Some(volume) = volume {
        options.volume = Volume::normalize(volume);
    }
    if let Some(language) = language {
        options.language_mode = language;
    }

    let outcome = board.speak_phrase(text, text, &options).await?;
    match (outcome.admission, outcome.tier) {
        (Admission::Played, Some(tier)) => println!("Spoke via {}", tier.as_str()),
        (admission, _) => println!("Not spoken: {admission:?}"),
    }

    Ok(())
}

async fn pregen(config: &Config, file: &Path, voices: &[String]) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)?;

    let voices: Vec<VoiceIdentity> = if voices.is_empty() {
        VoiceIdentity::ALL.to_vec()
    } else {
        voices.iter().map(|v| VoiceIdentity::normalize(v)).collect()
    };

    let plan = PregenPlan::new(content.lines().map(str::trim), &voices);
    if plan.is_empty() {
        println!("No phrases in {}", file.display());
        return Ok(());
    }

    let synthesizer = Arc::new(HttpSynthesizer::new(&config.remote)?);
    let store = CacheStore::file(config.cache_path());
    let mut events = bulk_populate(store, plan, synthesizer, Pacer::fixed(config.pregen_delay()));

    while let Some(event) = events.next().await {
        match event {
            PregenEvent::Skipped(p) => {
                println!("[{}/{}] cached    {} ({})", p.index, p.total, p.text, p.voice);
            }
            PregenEvent::Generated { progress: p, bytes } => {
                println!(
                    "[{}/{}] generated {} ({}, {bytes} bytes)",
                    p.index, p.total, p.text, p.voice
                );
            }
            PregenEvent::Failed { progress: p, error } => {
                println!("[{}/{}] FAILED    {} ({}): {error}", p.index, p.total, p.text, p.voice);
            }
            PregenEvent::Finished(summary) => {
                println!(
                    "\nDone: {} generated, {} already cached, {} failed",
                    summary.generated, summary.skipped, summary.failed
                );
            }
        }
    }

    Ok(())
}

fn cache(config: &Config, command: &CacheCommand) -> anyhow::Result<()> {
    let store = CacheStore::file(config.cache_path());

    match command {
        CacheCommand::Stats { json: true } => {
            println!("{}", serde_json::to_string_pretty(&store.stats()?)?);
        }
        CacheCommand::List { json: true } => {
            println!("{}", serde_json::to_string_pretty(&store.entries()?)?);
        }
        CacheCommand::Stats { json: false } => {
            let stats = store.stats()?;
            println!("Cache: {}", config.cache_path().display());
            println!("Entries: {}", stats.entry_count);
            println!("Size: {} bytes", stats.total_bytes);
        }
        CacheCommand::List { json: false } => {
            let entries = store.entries()?;
            if entries.is_empty() {
                println!("Cache is empty");
            }
            for entry in entries {
                println!(
                    "{}  {:<8} {:>9} B  {}",
                    entry.created_at.format("%Y-%m-%d %H:%M"),
                    entry.voice.as_str(),
                    entry.size,
                    entry.source_text
                );
            }
        }
        CacheCommand::Clear => {
            let before = store.stats()?;
            store.clear()?;
            println!("Removed {} cached phrases", before.entry_count);
        }
    }

    Ok(())
}

async fn list_voices() -> anyhow::Result<()> {
    let engine = CommandEngine::detect();
    let voices = engine.voices().await?;

    println!("{} voices from {}", voices.len(), engine.name());
    for voice in voices {
        let gender = voice.gender.map_or("-", VoiceIdentity::as_str);
        println!("{:<24} {:<10} {:<7} {}", voice.id, voice.locale, gender, voice.name);
    }

    Ok(())
}

/// Play a short tone through the speaker device
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let device = SpeakerDevice::new()?;
    let tone = sine_wav(440.0, 2.0, 24_000)?;

    device.play(&tone, Volume::normalize(0.3)).await?;

    println!("---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn sine_wav(frequency: f32, seconds: f32, sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    let num_samples = (sample_rate as f32 * seconds) as u32;
    for i in 0..num_samples {
        let t = i as f32 / sample_rate as f32;
        let sample = (2.0 * std::f32::consts::PI * frequency * t).sin();
        writer.write_sample((sample * f32::from(i16::MAX)) as i16)?;
    }
    writer.finalize()?;

    Ok(cursor.into_inner())
}
