//! Player configuration
//!
//! Small knob set loaded from a JSON file or built in code. Every field has
//! a default tuned for live low-latency streams; a config file only needs
//! the fields it wants to change.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decode::AccelPreference;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Frames the scheduler will hold before jumping the playback clock
    /// forward. Deliberately tiny; queue depth is latency.
    pub max_queued_frames: usize,
    /// Frames the renderer will hold while a swap is in flight. Overflow
    /// evicts the oldest and reports the drop.
    pub max_paint_queue: usize,
    /// Minimum spacing between aggregate stats reports.
    pub stats_interval_ms: i64,
    /// Hardware acceleration preference for the decode session.
    pub accel: AccelPreference,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            max_queued_frames: 2,
            max_paint_queue: 8,
            stats_interval_ms: 5000,
            accel: AccelPreference::WithFallback,
        }
    }
}

impl PlayerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.max_queued_frames, 2);
        assert_eq!(config.max_paint_queue, 8);
        assert_eq!(config.stats_interval_ms, 5000);
        assert_eq!(config.accel, AccelPreference::WithFallback);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "{{\"max_queued_frames\": 4, \"accel\": \"none\"}}").expect("write");

        let config = PlayerConfig::load(file.path()).expect("load");
        assert_eq!(config.max_queued_frames, 4);
        assert_eq!(config.accel, AccelPreference::None);
        assert_eq!(config.max_paint_queue, 8);
        assert_eq!(config.stats_interval_ms, 5000);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "{{not json").expect("write");
        assert!(matches!(
            PlayerConfig::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let missing = Path::new("/nonexistent/vigil.json");
        assert!(matches!(
            PlayerConfig::load(missing),
            Err(ConfigError::Io(_))
        ));
    }
}
