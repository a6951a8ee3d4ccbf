//! Transcode orchestration: requests, output naming and the engine that
//! drives the video and audio stages

pub mod engine;
pub mod naming;
pub mod request;

pub use engine::Transcoder;
pub use naming::output_file_name;
pub use request::{TranscodeOutcome, TranscodeRequest, VideoRoute};
