use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A rectangular region of interest in pixel coordinates.
///
/// Coordinates are fractional: trackers report sub-pixel positions and the
/// recorded output keeps them as-is. Serialized as `[left, top, width, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Roi {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Roi {
    pub const fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self { left, top, width, height }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// True when every coordinate is finite and non-negative and the area is non-zero.
    pub fn is_valid_seed(&self) -> bool {
        let coords = [self.left, self.top, self.width, self.height];
        coords.iter().all(|c| c.is_finite() && *c >= 0.0) && self.width > 0.0 && self.height > 0.0
    }

    /// True if the region shares any area with a `width × height` image.
    pub fn overlaps_image(&self, width: usize, height: usize) -> bool {
        self.right() > 0.0
            && self.bottom() > 0.0
            && self.left < width as f64
            && self.top < height as f64
            && self.width > 0.0
            && self.height > 0.0
    }
}

impl From<[f64; 4]> for Roi {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<Roi> for [f64; 4] {
    fn from(r: Roi) -> Self {
        [r.left, r.top, r.width, r.height]
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.left, self.top, self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid ROI '{0}': expected LEFT,TOP,WIDTH,HEIGHT")]
pub struct ParseRoiError(String);

/// Parses `"left,top,width,height"`.
impl FromStr for Roi {
    type Err = ParseRoiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| ParseRoiError(s.to_string()))?;
        match parts.as_slice() {
            [l, t, w, h] => Ok(Self::new(*l, *t, *w, *h)),
            _ => Err(ParseRoiError(s.to_string())),
        }
    }
}
