// Sample-level dump of a movie file

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use clipshrink::{
    media::{CodecConfig, SampleFlags},
    reference::Movie,
};

#[derive(Parser)]
#[command(name = "movie_info", about = "List the samples of a movie file")]
struct Args {
    /// Movie file to read
    movie: PathBuf,

    /// Only list this track
    #[arg(short, long)]
    track: Option<usize>,

    /// Samples listed per track
    #[arg(short, long, default_value_t = 20)]
    limit: usize,
}

fn flag_letters(flags: SampleFlags) -> String {
    [
        (SampleFlags::SYNC, 'S'),
        (SampleFlags::CODEC_CONFIG, 'C'),
        (SampleFlags::END_OF_STREAM, 'E'),
    ]
    .iter()
    .map(|&(flag, letter)| if flags.contains(flag) { letter } else { '-' })
    .collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let args = Args::parse();
    let movie = Movie::load(&args.movie).with_context(|| format!("Failed to read {:?}", args.movie))?;

    println!("🎞️  {} ({} tracks, rotation {})", args.movie.display(), movie.tracks.len(), movie.rotation_degrees);

    for (index, track) in movie.tracks.iter().enumerate() {
        if args.track.map_or(false, |wanted| wanted != index) {
            continue;
        }

        println!("\nTrack {}: {}", index, track.format.mime);
        if !track.format.codec_specific_data.is_empty() {
            let joined: Vec<u8> = track.format.codec_specific_data.iter().flat_map(|b| b.iter().copied()).collect();
            let config = CodecConfig::parse(&joined);
            println!(
                "   Parameter sets: {} sequence, {} picture{}",
                config.sequence_sets.len(),
                config.picture_sets.len(),
                if config.is_complete() { "" } else { " ⚠️ incomplete" }
            );
        }

        let mut previous: Option<i64> = None;
        for sample in track.samples.iter().take(args.limit) {
            let delta = previous.map_or_else(|| "-".to_string(), |p| (sample.presentation_time_us - p).to_string());
            println!(
                "   {:>12}us  {:>8} bytes  {}  (+{})",
                sample.presentation_time_us,
                sample.len(),
                flag_letters(sample.flags),
                delta
            );
            previous = Some(sample.presentation_time_us);
        }
        if track.samples.len() > args.limit {
            println!("   ... {} more", track.samples.len() - args.limit);
        }
    }

    Ok(())
}
