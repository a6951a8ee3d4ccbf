use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::media::{Dimensions, TimeWindow};

/// One transcode job
///
/// Zero width, height or bitrate mean "use the configured default".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeRequest {
    pub source: PathBuf,
    pub destination_dir: PathBuf,
    pub window: TimeWindow,
    pub size: Dimensions,
    pub bitrate: u32,
}

impl TranscodeRequest {
    /// Whole source at default size and bitrate
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(source: P, destination_dir: Q) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            destination_dir: destination_dir.as_ref().to_path_buf(),
            window: TimeWindow::unbounded(),
            size: Dimensions::default(),
            bitrate: 0,
        }
    }

    pub fn window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.size = Dimensions::new(width, height);
        self
    }

    pub fn bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }
}

/// How the video track reached the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoRoute {
    /// Decoded, scaled or rotated, and encoded again
    Transform,
    /// Encoded samples copied unchanged
    PassThrough,
    /// The source has no video track
    Absent,
}

impl std::fmt::Display for VideoRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoRoute::Transform => write!(f, "transform"),
            VideoRoute::PassThrough => write!(f, "pass-through"),
            VideoRoute::Absent => write!(f, "absent"),
        }
    }
}

/// Result of a transcode that got as far as creating its output
///
/// The file at `output_path` exists even when `success` is false, but may then
/// be empty or truncated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOutcome {
    /// Both the pipeline and finalization succeeded
    pub success: bool,
    pub output_path: PathBuf,
    /// First retained video timestamp, when the window had a start
    pub effective_video_start_us: Option<i64>,
    pub video_route: VideoRoute,
    pub video_samples: usize,
    pub audio_samples: usize,
    /// Error that stopped the video or audio stage
    pub pipeline_error: Option<String>,
    pub finalize_error: Option<String>,
    pub elapsed: Duration,
}
