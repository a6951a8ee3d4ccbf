//! # Media Model
//!
//! Data types shared by the pipeline and the collaborator traits a backend
//! implements: demultiplexer, muxer, decoder, encoder and the two render
//! surfaces between them.

pub mod param_sets;
pub mod traits;
pub mod types;

pub use param_sets::CodecConfig;
pub use traits::{
    BufferIndex, Canvas, CodecEvent, DecodedBuffer, Demuxer, DestinationSurface, EncodedBuffer,
    MediaBackend, Muxer, SourceSurface, TrackHandle, VideoDecoder, VideoEncoder,
};
pub use types::{
    Dimensions, EncoderSettings, MediaKind, OutputLayout, RenderSettings, Rotation, SampleFlags,
    SampleUnit, SourceMetadata, TargetGeometry, TimeWindow, TrackFormat, MICROS_PER_SECOND,
};
