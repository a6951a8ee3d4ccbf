use thiserror::Error;

/// Main error type for the clipshrink library
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Muxer error: {0}")]
    Muxer(#[from] MuxerError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Invalid request: {0}")]
    Request(#[from] RequestError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Errors raised while reading the source container
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Source file is missing or unreadable: {path}")]
    Unreadable { path: String },

    #[error("No track with index {index}")]
    NoSuchTrack { index: usize },

    #[error("Demultiplexing failed: {reason}")]
    DemuxFailed { reason: String },

    #[error("Invalid source metadata: {details}")]
    InvalidMetadata { details: String },
}

/// Errors raised by the decoder or encoder
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Codec configuration failed: {reason}")]
    ConfigureFailed { reason: String },

    #[error("Unknown codec buffer index {index}")]
    UnknownBuffer { index: usize },

    #[error("Queueing input failed: {reason}")]
    QueueFailed { reason: String },

    #[error("Dequeueing output failed: {reason}")]
    DequeueFailed { reason: String },

    #[error("Codec made no progress for {polls} consecutive polls")]
    Stalled { polls: u32 },
}

/// Errors raised by the output container writer
#[derive(Error, Debug)]
pub enum MuxerError {
    #[error("Cannot create output: {path}")]
    CreateFailed { path: String },

    #[error("Adding track failed: {reason}")]
    AddTrackFailed { reason: String },

    #[error("Unknown output track {handle}")]
    UnknownTrack { handle: usize },

    #[error("Writing sample failed: {reason}")]
    WriteFailed { reason: String },

    #[error("Finalizing output failed: {reason}")]
    FinalizeFailed { reason: String },
}

/// Errors raised by the render surfaces
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Surface unavailable: {reason}")]
    SurfaceUnavailable { reason: String },

    #[error("No new image arrived on the surface")]
    FrameTimeout,
}

/// Errors caused by an unusable transcode request
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Target dimensions resolve to zero: {width}x{height}")]
    ZeroDimensions { width: u32, height: u32 },

    #[error("Trim window start {start_us}us is not before end {end_us}us")]
    InvalidWindow { start_us: i64, end_us: i64 },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Convenience type alias for Results using TranscodeError
pub type Result<T> = std::result::Result<T, TranscodeError>;

impl TranscodeError {
    /// Create a generic error with a custom message
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// Whether this error aborts a transcode before any output is produced
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Source(SourceError::Unreadable { .. }) | Self::Request(_) | Self::Config(_)
        )
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Source(SourceError::Unreadable { path }) => {
                format!("Could not read '{}'. Please check the file exists and is readable.", path)
            }
            Self::Request(RequestError::ZeroDimensions { .. }) => {
                "The requested output size resolves to zero; pass 0 to use the default size.".to_string()
            }
            Self::Request(RequestError::InvalidWindow { start_us, end_us }) => {
                format!("Trim start ({}us) must come before trim end ({}us).", start_us, end_us)
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let unreadable: TranscodeError = SourceError::Unreadable { path: "a.mp4".into() }.into();
        assert!(unreadable.is_fatal());

        let zero: TranscodeError = RequestError::ZeroDimensions { width: 0, height: 720 }.into();
        assert!(zero.is_fatal());

        let stalled: TranscodeError = CodecError::Stalled { polls: 10 }.into();
        assert!(!stalled.is_fatal());
    }

    #[test]
    fn test_user_message_mentions_path() {
        let err: TranscodeError = SourceError::Unreadable { path: "clip.mp4".into() }.into();
        assert!(err.user_message().contains("clip.mp4"));
    }
}
