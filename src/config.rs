use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, Result},
    media::Dimensions,
    pipeline::PipelineSettings,
    reference::ReferenceSettings,
};

/// Main configuration for clipshrink
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Encoder defaults used when a request leaves a value at zero
    #[serde(default)]
    pub encoder: EncoderConfig,

    /// Decode/encode loop behaviour
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Output file naming
    #[serde(default)]
    pub output: OutputConfig,

    /// Software backend tuning
    #[serde(default)]
    pub reference: ReferenceSettings,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.encoder.validate()?;
        self.pipeline.validate()?;
        self.output.validate()?;

        if self.reference.input_slots <= self.reference.decoder_latency {
            return Err(invalid(
                "reference.input_slots",
                format!("{} (latency {})", self.reference.input_slots, self.reference.decoder_latency),
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, value: impl ToString) -> crate::error::TranscodeError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
    .into()
}

/// Encoder defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub default_width: u32,

    pub default_height: u32,

    /// Bits per second
    pub default_bitrate: u32,

    pub frame_rate: u32,

    /// Seconds between sync frames
    pub keyframe_interval_secs: u32,

    /// Output video codec
    pub mime: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            default_width: 1280,
            default_height: 720,
            default_bitrate: 3072 * 1024,
            frame_rate: 30,
            keyframe_interval_secs: 2,
            mime: "video/avc".to_string(),
        }
    }
}

impl EncoderConfig {
    pub fn default_size(&self) -> Dimensions {
        Dimensions::new(self.default_width, self.default_height)
    }

    fn validate(&self) -> Result<()> {
        if self.default_size().is_empty() {
            return Err(invalid("encoder.default_size", self.default_size()));
        }
        if self.default_bitrate == 0 {
            return Err(invalid("encoder.default_bitrate", self.default_bitrate));
        }
        if self.frame_rate == 0 {
            return Err(invalid("encoder.frame_rate", self.frame_rate));
        }
        if !self.mime.starts_with("video/") {
            return Err(invalid("encoder.mime", &self.mime));
        }
        Ok(())
    }
}

/// Decode/encode loop configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound for every codec poll, in microseconds
    pub poll_timeout_us: u64,

    /// Iterations without progress before the pipeline gives up
    pub max_idle_polls: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_timeout_us: 2_500,
            max_idle_polls: 20_000,
        }
    }
}

impl PipelineConfig {
    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            poll_timeout: Duration::from_micros(self.poll_timeout_us),
            max_idle_polls: self.max_idle_polls,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.poll_timeout_us == 0 {
            return Err(invalid("pipeline.poll_timeout_us", self.poll_timeout_us));
        }
        if self.max_idle_polls == 0 {
            return Err(invalid("pipeline.max_idle_polls", self.max_idle_polls));
        }
        Ok(())
    }
}

/// How output files are named
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamingScheme {
    /// Local wall-clock time, `yyyyMMdd_HHmmss`
    #[default]
    Timestamp,
    /// Stem of the source file; identical inputs give identical names
    SourceStem,
}

/// Output naming configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub prefix: String,

    /// File extension without the dot
    pub extension: String,

    pub naming: NamingScheme,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            prefix: "SILI_VIDEO_".to_string(),
            extension: "mp4".to_string(),
            naming: NamingScheme::Timestamp,
        }
    }
}

impl OutputConfig {
    fn validate(&self) -> Result<()> {
        if self.extension.is_empty() || self.extension.contains(['.', '/', '\\']) {
            return Err(invalid("output.extension", &self.extension));
        }
        if self.prefix.contains(['/', '\\']) {
            return Err(invalid("output.prefix", &self.prefix));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.encoder.default_bitrate, 3_145_728);
        assert_eq!(config.pipeline.settings().poll_timeout, Duration::from_micros(2_500));
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test_config.toml");

        let mut original_config = Config::default();
        original_config.output.naming = NamingScheme::SourceStem;

        original_config.save_to_file(&file_path).unwrap();
        let loaded_config = Config::from_file(&file_path).unwrap();

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("partial.toml");
        std::fs::write(&file_path, "[output]\nprefix = \"CLIP_\"\nextension = \"mov\"\nnaming = \"source-stem\"\n").unwrap();

        let config = Config::from_file(&file_path).unwrap();
        assert_eq!(config.output.prefix, "CLIP_");
        assert_eq!(config.output.naming, NamingScheme::SourceStem);
        assert_eq!(config.encoder, EncoderConfig::default());
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file("/nonexistent/clipshrink.toml");
        assert!(matches!(
            result,
            Err(crate::error::TranscodeError::Config(ConfigError::FileNotFound { .. }))
        ));
    }

    #[test]
    fn test_invalid_values() {
        let mut config = Config::default();
        config.encoder.frame_rate = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.max_idle_polls = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.reference.input_slots = config.reference.decoder_latency;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.output.extension = ".mp4".to_string();
        assert!(config.validate().is_err());
    }
}
