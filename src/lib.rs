//! # clipshrink
//!
//! Resize, re-encode and trim video clips while keeping audio and video in
//! sync.
//!
//! A transcode reads a source container, decodes its video track, draws every
//! frame scaled and upright onto the encoder's surface and encodes it again at
//! the requested size and bitrate. When the size does not change, encoded
//! samples are copied through untouched. The audio track is always copied,
//! starting no earlier than the first video frame that was kept.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use clipshrink::{
//!     config::Config,
//!     media::TimeWindow,
//!     reference::ReferenceBackend,
//!     transcode::{TranscodeRequest, Transcoder},
//! };
//!
//! # fn main() -> anyhow::Result<()> {
//! let transcoder = Transcoder::new(Config::default(), ReferenceBackend::default());
//! let request = TranscodeRequest::new("clip.mov", "out/")
//!     .window(TimeWindow::from_micros(2_000_000, 8_000_000))
//!     .size(1280, 720);
//!
//! let outcome = transcoder.transcode(&request)?;
//! println!("{} ({})", outcome.output_path.display(), outcome.success);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`media`] - Data model and the collaborator traits a backend implements
//! - [`pipeline`] - Track selection, trimming, pass-through copy and the
//!   decode/encode transform
//! - [`transcode`] - The orchestrating [`Transcoder`]
//! - [`reference`] - Deterministic software backend over movie files
//! - [`config`] - Configuration management
//!
//! ## Custom Backends
//!
//! Platform codecs plug in by implementing [`MediaBackend`](media::MediaBackend)
//! together with the demuxer, muxer, codec and surface traits it hands out.

pub mod config;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod reference;
pub mod transcode;

// Re-export commonly used types for convenience
pub use crate::{
    config::Config,
    error::{Result, TranscodeError},
    media::{MediaBackend, TimeWindow},
    reference::ReferenceBackend,
    transcode::{TranscodeOutcome, TranscodeRequest, Transcoder},
};
