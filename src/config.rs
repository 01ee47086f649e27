use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::processing::endpoints::DetectionStrategy;
use crate::processing::midline::MidlineMode;

/// Per-run analysis settings.
///
/// Stored in session files and loadable from TOML:
///
/// .. code-block:: toml
///
///    detection_strategy = "top"
///    midline_mode = "skeleton"
///    roi_offset = 0
///    snap_to_roi = true
///    auto_detect = true
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    #[serde(alias = "detection_method")]
    pub detection_strategy: DetectionStrategy,
    #[serde(alias = "midline_method")]
    pub midline_mode: MidlineMode,
    /// `contour_index = frame_index + roi_offset`
    pub roi_offset: i64,
    /// Snap dragged or copied positions onto the outline.
    pub snap_to_roi: bool,
    /// Fill in missing endpoints automatically when a frame is analysed.
    pub auto_detect: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        AnalysisSettings {
            detection_strategy: DetectionStrategy::Top,
            midline_mode: MidlineMode::Skeleton,
            roi_offset: 0,
            snap_to_roi: true,
            auto_detect: true,
        }
    }
}

impl AnalysisSettings {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let settings = toml::from_str(s).context("parsing analysis settings")?;
        Ok(settings)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string(self).context("serializing analysis settings")
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in settings file {}", path.display()))
    }
}
