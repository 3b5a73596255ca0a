//! Panel layout of combined dual-sensor frames.
//!
//! The Pinpoint recorder stacks the visible-light image above the
//! near-infrared image in a single video frame.

use crate::frame::{Frame, FrameError};
use serde::Deserialize;

/// A fixed rectangle of the combined frame, in whole pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Panel {
    pub top: usize,
    pub left: usize,
    pub height: usize,
    pub width: usize,
}

impl Panel {
    pub const fn bottom(&self) -> usize {
        self.top + self.height
    }

    pub const fn right(&self) -> usize {
        self.left + self.width
    }
}

/// Where the visible and infrared panels live inside a combined frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PanelLayout {
    pub visible: Panel,
    pub infrared: Panel,
}

/// Visible and infrared views of the same instant.
#[derive(Debug, Clone)]
pub struct FramePair {
    pub visible: Frame,
    pub infrared: Frame,
}

impl PanelLayout {
    /// Stryker Pinpoint: visible rows 0–359, infrared rows 360–719, columns 0–479.
    pub const PINPOINT: PanelLayout = PanelLayout {
        visible: Panel { top: 0, left: 0, height: 360, width: 480 },
        infrared: Panel { top: 360, left: 0, height: 360, width: 480 },
    };

    /// Smallest combined frame (rows, cols) that contains both panels.
    pub fn required_size(&self) -> (usize, usize) {
        (
            self.visible.bottom().max(self.infrared.bottom()),
            self.visible.right().max(self.infrared.right()),
        )
    }

    /// Slice a combined frame into its visible and infrared panels.
    pub fn split(&self, frame: &Frame) -> Result<FramePair, FrameError> {
        let (rows, cols) = self.required_size();
        if frame.height() < rows || frame.width() < cols {
            return Err(FrameError::Undersized {
                required_rows: rows,
                required_cols: cols,
                rows: frame.height(),
                cols: frame.width(),
            });
        }
        let crop = |p: &Panel| frame.crop(p.top, p.left, p.height, p.width);
        Ok(FramePair {
            visible: crop(&self.visible)?,
            infrared: crop(&self.infrared)?,
        })
    }

    /// Split, then reduce the visible panel to grayscale for the tracker.
    pub fn split_for_tracking(&self, frame: &Frame) -> Result<FramePair, FrameError> {
        let pair = self.split(frame)?;
        Ok(FramePair {
            visible: pair.visible.to_grayscale()?,
            infrared: pair.infrared,
        })
    }
}

impl Default for PanelLayout {
    fn default() -> Self {
        Self::PINPOINT
    }
}
