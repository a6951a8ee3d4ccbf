//! Per-track processing: stream selection, trimming, pass-through copy and
//! the decode/render/encode transform

pub mod copier;
pub mod selector;
pub mod session;
pub mod transform;
pub mod trim;

pub use copier::{copy_track, CopySummary};
pub use selector::select_track;
pub use session::CodecSession;
pub use transform::{transcode_video, PipelineSettings, TransformSummary, VideoTransform};
pub use trim::{CopyDecision, FrameDecision, TrimController};
