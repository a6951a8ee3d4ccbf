use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::RequestError;

/// Microseconds in one second, the unit of every timestamp in this crate
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Category of an elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// MIME prefix shared by every track of this kind
    pub fn mime_prefix(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio/",
            MediaKind::Video => "video/",
        }
    }

    /// Check whether a MIME type belongs to this kind
    pub fn matches(&self, mime: &str) -> bool {
        mime.starts_with(self.mime_prefix())
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        [MediaKind::Audio, MediaKind::Video]
            .into_iter()
            .find(|kind| kind.matches(mime))
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Portion of the source to keep, in microseconds
///
/// `None` on either side means unbounded: from the beginning, or to the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_us: Option<i64>,
    pub end_us: Option<i64>,
}

impl TimeWindow {
    /// The whole source
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn new(start_us: Option<i64>, end_us: Option<i64>) -> Self {
        Self { start_us, end_us }
    }

    /// Build a window from raw microsecond values where any non-positive value
    /// means "unbounded"
    pub fn from_micros(start_us: i64, end_us: i64) -> Self {
        Self {
            start_us: (start_us > 0).then_some(start_us),
            end_us: (end_us > 0).then_some(end_us),
        }
    }

    /// Reject windows whose bounds are both set but out of order
    pub fn validate(&self) -> std::result::Result<(), RequestError> {
        match (self.start_us, self.end_us) {
            (Some(start_us), Some(end_us)) if start_us >= end_us => {
                Err(RequestError::InvalidWindow { start_us, end_us })
            }
            _ => Ok(()),
        }
    }

    /// True once a timestamp reaches the end bound
    pub fn is_past_end(&self, timestamp_us: i64) -> bool {
        self.end_us.map_or(false, |end| timestamp_us >= end)
    }

    /// True while a timestamp is still before the start bound
    pub fn is_before_start(&self, timestamp_us: i64) -> bool {
        self.start_us.map_or(false, |start| timestamp_us < start)
    }

    /// Same end bound, different start
    pub fn with_start(self, start_us: Option<i64>) -> Self {
        Self { start_us, ..self }
    }

    /// Where to seek before reading: the start bound, or zero
    pub fn seek_target(&self) -> i64 {
        self.start_us.unwrap_or(0)
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bound = |value: Option<i64>| value.map_or_else(|| "..".to_string(), |v| format!("{}us", v));
        write!(f, "[{}, {})", bound(self.start_us), bound(self.end_us))
    }
}

bitflags! {
    /// Flags carried by an encoded sample
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SampleFlags: u32 {
        /// Decodable without reference to earlier samples.
        const SYNC = 0x0001;
        /// Codec configuration data rather than media.
        const CODEC_CONFIG = 0x0002;
        /// Last sample of the stream.
        const END_OF_STREAM = 0x0004;
    }
}

/// One encoded access unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleUnit {
    pub data: Bytes,
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
}

impl SampleUnit {
    pub fn new(data: impl Into<Bytes>, presentation_time_us: i64, flags: SampleFlags) -> Self {
        Self {
            data: data.into(),
            presentation_time_us,
            flags,
        }
    }

    /// Empty marker that ends a stream
    pub fn end_of_stream() -> Self {
        Self::new(Bytes::new(), 0, SampleFlags::END_OF_STREAM)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_sync(&self) -> bool {
        self.flags.contains(SampleFlags::SYNC)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(SampleFlags::END_OF_STREAM)
    }
}

/// Codec parameters of one track
///
/// Fields that do not apply to the track's kind stay `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackFormat {
    pub mime: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
    pub bitrate: Option<u32>,
    pub keyframe_interval_secs: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub max_input_size: Option<usize>,
    pub duration_us: Option<i64>,
    /// Codec-specific data blobs, in registration order (`csd-0`, `csd-1`, ...)
    pub codec_specific_data: Vec<Bytes>,
}

impl TrackFormat {
    pub fn video<S: Into<String>>(mime: S, width: u32, height: u32) -> Self {
        Self {
            mime: mime.into(),
            width: Some(width),
            height: Some(height),
            ..Self::default()
        }
    }

    pub fn audio<S: Into<String>>(mime: S, sample_rate: u32, channels: u16) -> Self {
        Self {
            mime: mime.into(),
            sample_rate: Some(sample_rate),
            channels: Some(channels),
            ..Self::default()
        }
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    pub fn with_duration(mut self, duration_us: i64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }

    pub fn with_max_input_size(mut self, max_input_size: usize) -> Self {
        self.max_input_size = Some(max_input_size);
        self
    }

    pub fn with_codec_specific_data(mut self, blobs: Vec<Bytes>) -> Self {
        self.codec_specific_data = blobs;
        self
    }

    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::from_mime(&self.mime)
    }

    pub fn is_audio(&self) -> bool {
        MediaKind::Audio.matches(&self.mime)
    }

    pub fn dimensions(&self) -> Option<Dimensions> {
        Some(Dimensions::new(self.width?, self.height?))
    }
}

/// Clockwise rotation applied to the stored picture for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Clockwise180,
    Clockwise270,
}

impl Rotation {
    /// Normalize any degree value; `None` when it is not a multiple of 90
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Clockwise90),
            180 => Some(Rotation::Clockwise180),
            270 => Some(Rotation::Clockwise270),
            _ => None,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Clockwise90 => 90,
            Rotation::Clockwise180 => 180,
            Rotation::Clockwise270 => 270,
        }
    }

    /// Quarter turns exchange width and height
    pub fn swaps_axes(&self) -> bool {
        matches!(self, Rotation::Clockwise90 | Rotation::Clockwise270)
    }
}

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn transposed(&self) -> Self {
        Self::new(self.height, self.width)
    }

    /// Replace zero components with the matching default
    pub fn or_defaults(&self, defaults: Dimensions) -> Self {
        Self::new(
            if self.width > 0 { self.width } else { defaults.width },
            if self.height > 0 { self.height } else { defaults.height },
        )
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Output frame size plus the rotation the renderer has to apply
///
/// Quarter-turn sources get their target width and height swapped so the
/// stored picture already has the display aspect ratio; the container then
/// declares no rotation at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetGeometry {
    pub size: Dimensions,
    pub render_rotation: Rotation,
    pub stored_rotation: Rotation,
}

impl TargetGeometry {
    pub fn resolve(requested: Dimensions, source_rotation: Rotation) -> Self {
        let size = if source_rotation.swaps_axes() {
            requested.transposed()
        } else {
            requested
        };
        Self {
            size,
            render_rotation: source_rotation,
            stored_rotation: Rotation::None,
        }
    }
}

/// Header information for a new output container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLayout {
    pub size: Dimensions,
    pub rotation: Rotation,
}

/// Properties read from the source before any track is opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: i32,
    pub bitrate: Option<u32>,
    pub duration_us: Option<i64>,
}

impl SourceMetadata {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }
}

/// How the encoder has to be configured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub mime: String,
    pub size: Dimensions,
    pub bitrate: u32,
    pub frame_rate: u32,
    pub keyframe_interval_secs: u32,
}

impl EncoderSettings {
    /// Output format announced before any configuration bytes exist
    pub fn track_format(&self) -> TrackFormat {
        TrackFormat::video(self.mime.clone(), self.size.width, self.size.height)
            .with_bitrate(self.bitrate)
            .with_frame_rate(self.frame_rate)
    }
}

/// How decoded frames have to be drawn onto the encoder's surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSettings {
    pub target: Dimensions,
    pub rotation: Rotation,
}
