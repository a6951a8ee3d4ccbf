//! Linear movie file used by the reference backend
//!
//! A movie is a list of tracks, each a format plus its samples in
//! presentation order. On disk it is a short magic header followed by the
//! bincode encoding of [`Movie`].

use std::fs;
use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{Result, SourceError},
    media::{
        Canvas, CodecConfig, Dimensions, MediaKind, SampleFlags, SampleUnit, SourceMetadata,
        TrackFormat, MICROS_PER_SECOND,
    },
    reference::codec::{codec_config, encode_picture},
};

/// First bytes of every movie file
pub const MOVIE_MAGIC: &[u8; 8] = b"CLIPMOV1";

/// MIME type of generated video tracks
pub const SYNTHETIC_VIDEO_MIME: &str = "video/avc";

/// MIME type of generated audio tracks
pub const SYNTHETIC_AUDIO_MIME: &str = "audio/mp4a-latm";

const AUDIO_SAMPLE_RATE: u32 = 44_100;
const AUDIO_CHANNELS: u16 = 2;
const AUDIO_FRAME_SAMPLES: i64 = 1_024;
const AUDIO_FRAME_BYTES: usize = 96;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieTrack {
    pub format: TrackFormat,
    pub samples: Vec<SampleUnit>,
}

impl MovieTrack {
    pub fn duration_us(&self) -> i64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.presentation_time_us - first.presentation_time_us,
            _ => 0,
        }
    }

    pub fn payload_bytes(&self) -> usize {
        self.samples.iter().map(SampleUnit::len).sum()
    }

    pub fn sync_samples(&self) -> usize {
        self.samples.iter().filter(|s| s.is_sync()).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movie {
    /// Clockwise display rotation declared by the container
    pub rotation_degrees: i32,
    pub tracks: Vec<MovieTrack>,
}

impl Movie {
    /// Append a track and return its index
    pub fn add_track(&mut self, format: TrackFormat, samples: Vec<SampleUnit>) -> usize {
        self.tracks.push(MovieTrack { format, samples });
        self.tracks.len() - 1
    }

    pub fn track_of(&self, kind: MediaKind) -> Option<&MovieTrack> {
        self.tracks.iter().find(|t| kind.matches(&t.format.mime))
    }

    pub fn duration_us(&self) -> i64 {
        self.tracks.iter().map(MovieTrack::duration_us).max().unwrap_or(0)
    }

    /// Metadata a probe reports: first video track plus container rotation
    pub fn metadata(&self) -> Result<SourceMetadata> {
        let video = self.track_of(MediaKind::Video).ok_or_else(|| SourceError::InvalidMetadata {
            details: "no video track".to_string(),
        })?;
        let size = video.format.dimensions().ok_or_else(|| SourceError::InvalidMetadata {
            details: "video track without dimensions".to_string(),
        })?;

        Ok(SourceMetadata {
            width: size.width,
            height: size.height,
            rotation_degrees: self.rotation_degrees,
            bitrate: video.format.bitrate,
            duration_us: Some(video.format.duration_us.unwrap_or_else(|| video.duration_us())),
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|_| SourceError::Unreadable {
            path: path.display().to_string(),
        })?;

        let body = data.strip_prefix(MOVIE_MAGIC.as_slice()).ok_or_else(|| SourceError::DemuxFailed {
            reason: format!("{} is not a movie file", path.display()),
        })?;
        let movie: Movie = bincode::deserialize(body)?;
        debug!("Loaded movie {} with {} tracks", path.display(), movie.tracks.len());
        Ok(movie)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut data = MOVIE_MAGIC.to_vec();
        data.extend(bincode::serialize(self)?);
        fs::write(path.as_ref(), data)?;
        debug!("Saved movie {} with {} tracks", path.as_ref().display(), self.tracks.len());
        Ok(())
    }
}

/// Generator for test clips: a hue cycle in the reference bitstream plus
/// fake audio frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticClip {
    pub size: Dimensions,
    pub duration_us: i64,
    pub frame_rate: u32,
    pub keyframe_interval_secs: u32,
    pub rotation_degrees: i32,
    pub with_audio: bool,
}

impl Default for SyntheticClip {
    fn default() -> Self {
        Self {
            size: Dimensions::new(64, 36),
            duration_us: 2 * MICROS_PER_SECOND,
            frame_rate: 10,
            keyframe_interval_secs: 1,
            rotation_degrees: 0,
            with_audio: true,
        }
    }
}

impl SyntheticClip {
    pub fn generate(&self) -> Movie {
        let frame_rate = i64::from(self.frame_rate.max(1));
        let frame_count = self.duration_us * frame_rate / MICROS_PER_SECOND;
        let keyframe_every = (frame_rate * i64::from(self.keyframe_interval_secs)).max(1);

        let samples = (0..frame_count)
            .map(|i| {
                let hue = (i as f32 / frame_count as f32) * 360.0;
                let color = image::Rgb(hsv_to_rgb(hue, 0.7, 0.9));
                let picture = Canvas::from_pixel(self.size.width, self.size.height, color);
                let sync = i % keyframe_every == 0;
                let flags = if sync { SampleFlags::SYNC } else { SampleFlags::empty() };
                SampleUnit::new(encode_picture(&picture, sync), i * MICROS_PER_SECOND / frame_rate, flags)
            })
            .collect::<Vec<_>>();

        let config = CodecConfig::parse(&codec_config(self.size, self.frame_rate, true));
        let format = TrackFormat::video(SYNTHETIC_VIDEO_MIME, self.size.width, self.size.height)
            .with_frame_rate(self.frame_rate)
            .with_duration(self.duration_us)
            .with_max_input_size(samples.iter().map(SampleUnit::len).max().unwrap_or(0))
            .with_codec_specific_data(config.codec_specific_data());

        let mut movie = Movie {
            rotation_degrees: self.rotation_degrees,
            tracks: Vec::new(),
        };
        movie.add_track(format, samples);

        if self.with_audio {
            let format = TrackFormat::audio(SYNTHETIC_AUDIO_MIME, AUDIO_SAMPLE_RATE, AUDIO_CHANNELS)
                .with_bitrate(128_000)
                .with_duration(self.duration_us)
                .with_max_input_size(AUDIO_FRAME_BYTES);
            movie.add_track(format, audio_frames(self.duration_us));
        }

        info!(
            "Generated {} synthetic clip: {} frames over {}us",
            self.size, frame_count, self.duration_us
        );
        movie
    }
}

/// Fixed-size audio access units, every one a sync sample
fn audio_frames(duration_us: i64) -> Vec<SampleUnit> {
    let sample_rate = i64::from(AUDIO_SAMPLE_RATE);
    (0..)
        .map(|n: i64| n * AUDIO_FRAME_SAMPLES * MICROS_PER_SECOND / sample_rate)
        .take_while(|&ts| ts < duration_us)
        .enumerate()
        .map(|(n, ts)| {
            let payload: Vec<u8> = (0..AUDIO_FRAME_BYTES).map(|b| (n + b) as u8).collect();
            SampleUnit::new(Bytes::from(payload), ts, SampleFlags::SYNC)
        })
        .collect()
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match h {
        h if h < 60.0 => (c, x, 0.0),
        h if h < 120.0 => (x, c, 0.0),
        h if h < 180.0 => (0.0, c, x),
        h if h < 240.0 => (0.0, x, c),
        h if h < 300.0 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    [((r + m) * 255.0) as u8, ((g + m) * 255.0) as u8, ((b + m) * 255.0) as u8]
}
