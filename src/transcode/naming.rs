use std::path::Path;

use chrono::{DateTime, Local};

use crate::config::{NamingScheme, OutputConfig};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// File name for a new output, e.g. `SILI_VIDEO_20240131_235959.mp4`
pub fn output_file_name(config: &OutputConfig, source: &Path, now: DateTime<Local>) -> String {
    let tag = match config.naming {
        NamingScheme::Timestamp => now.format(TIMESTAMP_FORMAT).to_string(),
        NamingScheme::SourceStem => source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| "output".to_string()),
    };
    format!("{}{}.{}", config.prefix, tag, config.extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 31, 23, 59, 58).unwrap()
    }

    #[test]
    fn test_timestamp_naming() {
        let name = output_file_name(&OutputConfig::default(), Path::new("/videos/a.mov"), now());
        assert_eq!(name, "SILI_VIDEO_20240131_235958.mp4");
    }

    #[test]
    fn test_source_stem_naming() {
        let config = OutputConfig {
            naming: NamingScheme::SourceStem,
            ..OutputConfig::default()
        };
        let name = output_file_name(&config, Path::new("/videos/holiday.clip.mov"), now());
        assert_eq!(name, "SILI_VIDEO_holiday.clip.mp4");

        let name = output_file_name(&config, Path::new("/"), now());
        assert_eq!(name, "SILI_VIDEO_output.mp4");
    }
}
