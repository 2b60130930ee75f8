use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::board::BoardLayout;
use crate::detector::DetectorParameters;
use crate::overlay::OverlayConfig;
use crate::tracker::TrackerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Settings of an [`ArSession`](crate::session::ArSession). Every section is
/// optional:
///
/// ```toml
/// [detector]
/// adaptive_radius = 4
///
/// [layout]
/// board_marker_size = 0.05
/// fixed = [{ id = 666, position = [0.0, 0.0, 0.0] }]
///
/// [tracker]
/// expiry_secs = 1.0
///
/// [overlay]
/// stride = 0.05
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub detector: DetectorParameters,
    pub layout: BoardLayout,
    pub tracker: TrackerConfig,
    pub overlay: OverlayConfig,
}

impl SessionConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_empty_config_is_default() -> anyhow::Result<()> {
        let config = SessionConfig::from_toml_str("")?;
        assert_eq!(config.detector.adaptive_radius, 3);
        assert_eq!(config.layout, BoardLayout::default());
        assert_eq!(config.tracker, TrackerConfig::default());
        assert_eq!(config.overlay, OverlayConfig::default());
        Ok(())
    }

    #[test]
    fn test_partial_sections() -> anyhow::Result<()> {
        let config = SessionConfig::from_toml_str(
            r#"
            [detector]
            adaptive_radius = 5
            refine_corners = false

            [layout]
            piece_marker_size = 0.03
            fixed = [{ id = 1, position = [0.0, 0.0, 0.0] }]

            [overlay]
            stride = 0.1
            "#,
        )?;

        assert_eq!(config.detector.adaptive_radius, 5);
        assert!(!config.detector.refine_corners);
        assert_eq!(config.detector.cell_px, 7);
        assert_relative_eq!(config.layout.piece_marker_size, 0.03);
        assert!(config.layout.is_board_marker(1));
        assert!(!config.layout.is_board_marker(666));
        assert_relative_eq!(config.overlay.stride, 0.1);
        assert_relative_eq!(config.tracker.expiry_secs, 1.0);
        Ok(())
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            SessionConfig::from_toml_str("[detector]\nadaptive_radius = \"big\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SessionConfig::load("/nonexistent/cvaruco.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
