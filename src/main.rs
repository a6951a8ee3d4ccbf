use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use clipshrink::{
    config::Config,
    media::{Dimensions, MediaKind, TimeWindow, MICROS_PER_SECOND},
    reference::{Movie, ReferenceBackend, SyntheticClip},
    transcode::{TranscodeRequest, Transcoder},
};

#[derive(Parser)]
#[command(
    name = "clipshrink",
    version,
    about = "Resize, re-encode and trim video clips",
    long_about = "clipshrink transcodes a source clip to a target size and bitrate, optionally trimmed to a time window, keeping audio aligned with the first retained video frame."
)]
struct Cli {
    /// Configuration file (optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transcode a clip into a directory and print the output path
    Transcode {
        /// Source movie file
        source: PathBuf,

        /// Directory receiving the output
        destination: PathBuf,

        /// Window start in microseconds; zero or less keeps the beginning
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        start_us: i64,

        /// Window end in microseconds; zero or less keeps the end
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        end_us: i64,

        /// Output width, 0 for the default
        #[arg(long, default_value_t = 0)]
        width: u32,

        /// Output height, 0 for the default
        #[arg(long, default_value_t = 0)]
        height: u32,

        /// Output bitrate in bits per second, 0 for the default
        #[arg(long, default_value_t = 0)]
        bitrate: u32,
    },

    /// Write a synthetic test clip
    Synth {
        /// Output movie file
        output: PathBuf,

        #[arg(long, default_value_t = 320)]
        width: u32,

        #[arg(long, default_value_t = 180)]
        height: u32,

        /// Duration in seconds
        #[arg(long, default_value_t = 5.0)]
        duration: f64,

        #[arg(long, default_value_t = 30)]
        fps: u32,

        /// Seconds between sync frames
        #[arg(long, default_value_t = 2)]
        keyframe_interval: u32,

        /// Declared clockwise rotation in degrees
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        rotation: i32,

        /// Leave out the audio track
        #[arg(long)]
        no_audio: bool,
    },

    /// Summarize a movie file
    Inspect {
        movie: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    info!("Starting clipshrink v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Transcode {
            source,
            destination,
            start_us,
            end_us,
            width,
            height,
            bitrate,
        } => {
            let request = TranscodeRequest::new(source, destination)
                .window(TimeWindow::from_micros(start_us, end_us))
                .size(width, height)
                .bitrate(bitrate);
            run_transcode(config, request).await
        }
        Command::Synth {
            output,
            width,
            height,
            duration,
            fps,
            keyframe_interval,
            rotation,
            no_audio,
        } => {
            let clip = SyntheticClip {
                size: Dimensions::new(width, height),
                duration_us: (duration * MICROS_PER_SECOND as f64) as i64,
                frame_rate: fps,
                keyframe_interval_secs: keyframe_interval,
                rotation_degrees: rotation,
                with_audio: !no_audio,
            };
            clip.generate()
                .save(&output)
                .with_context(|| format!("Failed to write {:?}", output))?;
            info!("Synthetic clip saved to: {:?}", output);
            Ok(())
        }
        Command::Inspect { movie } => inspect(&movie),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)?
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    };
    config.validate()?;
    Ok(config)
}

async fn run_transcode(config: Config, request: TranscodeRequest) -> Result<()> {
    let backend = ReferenceBackend::new(config.reference.clone());
    let transcoder = Transcoder::new(config, backend);

    // The codec loop polls synchronously; keep it off the async workers
    let outcome = tokio::task::spawn_blocking(move || transcoder.transcode(&request))
        .await
        .context("Transcode task panicked")?
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    if let Some(error) = &outcome.pipeline_error {
        warn!("Pipeline error: {}", error);
    }
    if let Some(error) = &outcome.finalize_error {
        warn!("Finalize error: {}", error);
    }

    println!("{}", outcome.output_path.display());
    if outcome.success {
        Ok(())
    } else {
        anyhow::bail!("Transcode of {:?} did not complete", outcome.output_path)
    }
}

fn inspect(path: &Path) -> Result<()> {
    let movie = Movie::load(path).with_context(|| format!("Failed to read {:?}", path))?;

    println!("{}", path.display());
    println!("  rotation: {} degrees", movie.rotation_degrees);
    println!("  duration: {:.3}s", movie.duration_us() as f64 / MICROS_PER_SECOND as f64);
    for (index, track) in movie.tracks.iter().enumerate() {
        let kind = track.format.kind().map_or("other".to_string(), |k| k.to_string());
        let detail = match track.format.kind() {
            Some(MediaKind::Video) => track
                .format
                .dimensions()
                .map_or_else(String::new, |d| d.to_string()),
            Some(MediaKind::Audio) => format!(
                "{} Hz, {} channels",
                track.format.sample_rate.unwrap_or(0),
                track.format.channels.unwrap_or(0)
            ),
            None => String::new(),
        };
        println!(
            "  track {}: {} {} {} | {} samples ({} sync), {} bytes, {} parameter sets",
            index,
            kind,
            track.format.mime,
            detail,
            track.samples.len(),
            track.sync_samples(),
            track.payload_bytes(),
            track.format.codec_specific_data.len()
        );
    }
    Ok(())
}
