//! Session configuration, loaded from a TOML file.
//!
//! ```toml
//! rois = [[10, 100, 30, 50], [100, 100, 50, 30]]
//! aggregate = "median"
//! spread = "std"
//!
//! [layout]
//! visible = { top = 0, left = 0, height = 360, width = 480 }
//! infrared = { top = 360, left = 0, height = 360, width = 480 }
//!
//! [median_flow]
//! grid_size = 10
//! ```

use crate::aggregate::Statistic;
use crate::split::PanelLayout;
use crate::tracker::MedianFlowParams;
use crate::types::Roi;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("bad session TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid session config: {0}")]
    Invalid(String),
}

/// Everything a tracking session needs besides its frames and output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seed regions on the first visible frame, `[left, top, width, height]`.
    pub rois: Vec<Roi>,
    pub aggregate: Statistic,
    pub spread: Option<Statistic>,
    pub layout: PanelLayout,
    pub median_flow: MedianFlowParams,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rois: Vec::new(),
            aggregate: Statistic::Median,
            spread: None,
            layout: PanelLayout::PINPOINT,
            median_flow: MedianFlowParams::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), rois = config.rois.len(), "loaded session config");
        Ok(config)
    }

    /// Reject configs that cannot start a session.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rois.is_empty() {
            return Err(ConfigError::Invalid("at least one ROI is required".into()));
        }
        if let Some((i, roi)) = self.rois.iter().enumerate().find(|(_, r)| !r.is_valid_seed()) {
            return Err(ConfigError::Invalid(format!(
                "ROI {i} ({roi}) must have non-negative coordinates and a non-zero size"
            )));
        }
        let l = &self.layout;
        if l.visible.width == 0 || l.visible.height == 0 || l.infrared.width == 0 || l.infrared.height == 0 {
            return Err(ConfigError::Invalid("panel layout has an empty panel".into()));
        }
        if self.median_flow.grid_size == 0 || self.median_flow.levels == 0 {
            return Err(ConfigError::Invalid("median_flow grid_size and levels must be at least 1".into()));
        }
        Ok(())
    }
}
