use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use image::RgbImage;

use crate::{
    error::{RenderError, Result},
    media::types::{
        EncoderSettings, OutputLayout, RenderSettings, SampleFlags, SampleUnit, SourceMetadata,
        TrackFormat,
    },
};

/// Pixel buffer a source surface draws into
pub type Canvas = RgbImage;

/// Reads a container and exposes its tracks as timestamped samples
///
/// Reads always come from the currently selected tracks, in source order.
pub trait Demuxer {
    fn track_count(&self) -> usize;

    fn track_format(&self, index: usize) -> Result<TrackFormat>;

    fn select_track(&mut self, index: usize) -> Result<()>;

    fn unselect_track(&mut self, index: usize) -> Result<()>;

    /// Move to the nearest sync sample at or before `time_us`
    fn seek_to(&mut self, time_us: i64) -> Result<()>;

    /// Track of the current sample, or `None` when nothing is left to read
    fn sample_track_index(&self) -> Option<usize>;

    /// Current sample, or `None` when nothing is left to read
    fn read_sample(&mut self) -> Result<Option<SampleUnit>>;

    /// Step to the next sample; false once the end is reached
    fn advance(&mut self) -> bool;

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opaque handle of a track registered with a [`Muxer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackHandle(pub usize);

/// Accumulates samples per track and serializes a playable file
///
/// The output is only complete once [`Muxer::finalize`] returned `Ok`.
pub trait Muxer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<TrackHandle>;

    /// Returns false when the sample was refused
    fn write_sample(&mut self, track: TrackHandle, sample: &SampleUnit) -> Result<bool>;

    /// Flush and close the output; `truncate` discards anything not yet committed
    fn finalize(&mut self, truncate: bool) -> Result<()>;
}

/// Index of a codec-owned buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferIndex(pub usize);

/// Result of polling a codec for output
#[derive(Debug, Clone, PartialEq)]
pub enum CodecEvent<T> {
    /// Nothing ready within the poll timeout
    TryAgain,
    /// Buffer set was reallocated; previously seen indices are stale
    BuffersChanged,
    /// Output format is now known
    FormatChanged(TrackFormat),
    Buffer(T),
}

/// A decoded frame still held by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedBuffer {
    pub index: BufferIndex,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
}

impl DecodedBuffer {
    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(SampleFlags::END_OF_STREAM)
    }
}

/// Encoded output still held by the encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBuffer {
    pub index: BufferIndex,
    pub data: Bytes,
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
}

impl EncodedBuffer {
    pub fn is_codec_config(&self) -> bool {
        self.flags.contains(SampleFlags::CODEC_CONFIG)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(SampleFlags::END_OF_STREAM)
    }

    pub fn to_sample(&self) -> SampleUnit {
        SampleUnit::new(self.data.clone(), self.presentation_time_us, self.flags)
    }
}

/// Decoder rendering its output onto a [`SourceSurface`]
pub trait VideoDecoder {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Claim a free input buffer, waiting at most `timeout`
    fn dequeue_input(&mut self, timeout: Duration) -> Result<Option<BufferIndex>>;

    /// Submit a sample into a claimed buffer
    ///
    /// A sample flagged [`SampleFlags::END_OF_STREAM`] ends the input.
    fn queue_input(&mut self, index: BufferIndex, sample: SampleUnit) -> Result<()>;

    fn dequeue_output(&mut self, timeout: Duration) -> Result<CodecEvent<DecodedBuffer>>;

    /// Hand a frame back; with `render` set it is drawn onto the source surface
    fn release_output(&mut self, index: BufferIndex, render: bool) -> Result<()>;

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Encoder fed through a [`DestinationSurface`]
pub trait VideoEncoder {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// No more frames will be presented on the input surface
    fn signal_end_of_input(&mut self) -> Result<()>;

    fn dequeue_output(&mut self, timeout: Duration) -> Result<CodecEvent<EncodedBuffer>>;

    fn release_output(&mut self, index: BufferIndex) -> Result<()>;

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Surface receiving decoded frames
pub trait SourceSurface {
    /// Wait until the decoder rendered a new image
    fn await_new_image(&mut self) -> std::result::Result<(), RenderError>;

    /// Draw the latest image onto `target`, applying scale and rotation
    fn draw_image(&mut self, target: &mut dyn DestinationSurface) -> std::result::Result<(), RenderError>;

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Surface feeding the encoder's input
pub trait DestinationSurface {
    fn make_current(&mut self) -> std::result::Result<(), RenderError>;

    /// Pixel buffer drawn by the next [`SourceSurface::draw_image`]
    fn canvas(&mut self) -> std::result::Result<&mut Canvas, RenderError>;

    /// Timestamp of the next presented frame, in nanoseconds
    fn set_presentation_time(&mut self, time_ns: i64) -> std::result::Result<(), RenderError>;

    /// Present the canvas to the encoder
    fn swap_buffers(&mut self) -> std::result::Result<(), RenderError>;

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Factory for every collaborator one transcode needs
///
/// Each call hands out exclusively owned objects; nothing is shared between
/// transcodes.
pub trait MediaBackend {
    fn name(&self) -> &str;

    /// Read dimensions and rotation without opening any track
    fn probe(&self, path: &Path) -> Result<SourceMetadata>;

    fn open_source(&self, path: &Path) -> Result<Box<dyn Demuxer>>;

    fn create_muxer(&self, path: &Path, layout: OutputLayout) -> Result<Box<dyn Muxer>>;

    /// Configured encoder plus its input surface
    fn create_encoder(
        &self,
        settings: &EncoderSettings,
    ) -> Result<(Box<dyn VideoEncoder>, Box<dyn DestinationSurface>)>;

    /// Configured decoder plus the surface it renders onto
    fn create_decoder(
        &self,
        format: &TrackFormat,
        render: RenderSettings,
    ) -> Result<(Box<dyn VideoDecoder>, Box<dyn SourceSurface>)>;
}
