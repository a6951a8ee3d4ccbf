//! # Reference Backend
//!
//! Software implementation of every collaborator a transcode needs. Sources
//! and outputs are [`Movie`] files, pictures travel uncompressed through a
//! start-code framed bitstream and the render surfaces are plain RGB images
//! scaled with the `image` crate.
//!
//! The backend is deterministic: the same input always produces the same
//! output samples.

pub mod codec;
pub mod demuxer;
pub mod movie;
pub mod muxer;
pub mod surface;

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{CodecError, Result},
    media::{
        Demuxer, DestinationSurface, EncoderSettings, MediaBackend, MediaKind, Muxer, OutputLayout,
        RenderSettings, SourceMetadata, SourceSurface, TrackFormat, VideoDecoder, VideoEncoder,
    },
};

pub use codec::{SoftwareDecoder, SoftwareEncoder};
pub use demuxer::MemoryDemuxer;
pub use movie::{Movie, MovieTrack, SyntheticClip};
pub use muxer::MemoryMuxer;
pub use surface::{DecoderSurface, EncoderSurface};

use surface::{EncoderQueue, FrameSlot};

/// Resampling filter used when scaling pictures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleFilter {
    Nearest,
    #[default]
    Triangle,
    Lanczos3,
}

impl ScaleFilter {
    pub fn filter_type(&self) -> FilterType {
        match self {
            ScaleFilter::Nearest => FilterType::Nearest,
            ScaleFilter::Triangle => FilterType::Triangle,
            ScaleFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Tuning of the software codecs and surfaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSettings {
    pub scale_filter: ScaleFilter,
    /// Pictures the decoder holds back before releasing output
    pub decoder_latency: usize,
    /// Decoder input buffers; must exceed the latency
    pub input_slots: usize,
}

impl Default for ReferenceSettings {
    fn default() -> Self {
        Self {
            scale_filter: ScaleFilter::Triangle,
            decoder_latency: 2,
            input_slots: 4,
        }
    }
}

/// Scripted misbehaviour for exercising recovery paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Faults {
    render_failures: Vec<i64>,
    omit_parameter_sets: bool,
    silent_encoder: bool,
    restless_encoder: bool,
    data_before_config: bool,
}

/// [`MediaBackend`] over movie files and software codecs
#[derive(Debug, Clone, Default)]
pub struct ReferenceBackend {
    settings: ReferenceSettings,
    faults: Faults,
}

impl ReferenceBackend {
    pub fn new(settings: ReferenceSettings) -> Self {
        Self {
            settings,
            faults: Faults::default(),
        }
    }

    pub fn settings(&self) -> &ReferenceSettings {
        &self.settings
    }

    /// Report the pictures at these timestamps as lost during rendering
    pub fn with_render_failures(mut self, timestamps_us: Vec<i64>) -> Self {
        self.faults.render_failures = timestamps_us;
        self
    }

    /// Emit a configuration blob without sequence and picture parameter sets
    pub fn without_parameter_sets(mut self) -> Self {
        self.faults.omit_parameter_sets = true;
        self
    }

    /// Encoders that never produce any output
    pub fn with_silent_encoder(mut self) -> Self {
        self.faults.silent_encoder = true;
        self
    }

    /// Encoders that keep announcing format changes and never produce a buffer
    pub fn with_restless_encoder(mut self) -> Self {
        self.faults.restless_encoder = true;
        self
    }

    /// Encoders that emit their first encoded frame ahead of the codec configuration
    pub fn with_data_before_config(mut self) -> Self {
        self.faults.data_before_config = true;
        self
    }
}

impl MediaBackend for ReferenceBackend {
    fn name(&self) -> &str {
        "reference"
    }

    fn probe(&self, path: &Path) -> Result<SourceMetadata> {
        Movie::load(path)?.metadata()
    }

    fn open_source(&self, path: &Path) -> Result<Box<dyn Demuxer>> {
        Ok(Box::new(MemoryDemuxer::open(path)?))
    }

    fn create_muxer(&self, path: &Path, layout: OutputLayout) -> Result<Box<dyn Muxer>> {
        Ok(Box::new(MemoryMuxer::create(path, layout)?))
    }

    fn create_encoder(
        &self,
        settings: &EncoderSettings,
    ) -> Result<(Box<dyn VideoEncoder>, Box<dyn DestinationSurface>)> {
        if settings.size.is_empty() || settings.frame_rate == 0 {
            return Err(CodecError::ConfigureFailed {
                reason: format!("unusable encoder settings: {} at {} fps", settings.size, settings.frame_rate),
            }
            .into());
        }

        let queue = Rc::new(RefCell::new(EncoderQueue::default()));
        let mut encoder = SoftwareEncoder::new(settings.clone(), Rc::clone(&queue));
        if self.faults.omit_parameter_sets {
            encoder = encoder.without_parameter_sets();
        }
        if self.faults.silent_encoder {
            encoder = encoder.silent();
        }
        if self.faults.restless_encoder {
            encoder = encoder.restless();
        }
        if self.faults.data_before_config {
            encoder = encoder.data_before_config();
        }
        let surface = EncoderSurface::new(settings.size, queue);

        debug!("Reference encoder configured for {}", settings.size);
        Ok((Box::new(encoder), Box::new(surface)))
    }

    fn create_decoder(
        &self,
        format: &TrackFormat,
        render: RenderSettings,
    ) -> Result<(Box<dyn VideoDecoder>, Box<dyn SourceSurface>)> {
        if !MediaKind::Video.matches(&format.mime) {
            return Err(CodecError::ConfigureFailed {
                reason: format!("cannot decode {}", format.mime),
            }
            .into());
        }

        let slot = Rc::new(RefCell::new(FrameSlot::default()));
        let decoder = SoftwareDecoder::new(
            self.settings.input_slots,
            self.settings.decoder_latency,
            Rc::clone(&slot),
        );
        let surface = DecoderSurface::new(slot, render.rotation, self.settings.scale_filter)
            .with_failures(self.faults.render_failures.clone());

        debug!(
            "Reference decoder configured for {} -> {} (rotation {})",
            format.mime,
            render.target,
            render.rotation.degrees()
        );
        Ok((Box::new(decoder), Box::new(surface)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{Dimensions, Rotation};
    use tempfile::tempdir;

    #[test]
    fn test_probe_and_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.mov");
        SyntheticClip::default().generate().save(&path).unwrap();

        let backend = ReferenceBackend::default();
        let metadata = backend.probe(&path).unwrap();
        assert_eq!(metadata.dimensions(), Dimensions::new(64, 36));

        let source = backend.open_source(&path).unwrap();
        assert_eq!(source.track_count(), 2);
    }

    #[test]
    fn test_unusable_encoder_settings_are_rejected() {
        let settings = EncoderSettings {
            mime: "video/avc".to_string(),
            size: Dimensions::new(0, 720),
            bitrate: 1,
            frame_rate: 30,
            keyframe_interval_secs: 2,
        };
        assert!(ReferenceBackend::default().create_encoder(&settings).is_err());
    }

    #[test]
    fn test_audio_tracks_cannot_be_decoded() {
        let render = RenderSettings {
            target: Dimensions::new(8, 8),
            rotation: Rotation::None,
        };
        let format = TrackFormat::audio("audio/mp4a-latm", 44_100, 2);
        assert!(ReferenceBackend::default().create_decoder(&format, render).is_err());
    }

    #[test]
    fn test_scale_filter_names() {
        let filter: ScaleFilter = toml::from_str::<ReferenceSettings>(
            "scale_filter = \"lanczos3\"\ndecoder_latency = 0\ninput_slots = 1",
        )
        .unwrap()
        .scale_filter;
        assert_eq!(filter, ScaleFilter::Lanczos3);
    }
}
