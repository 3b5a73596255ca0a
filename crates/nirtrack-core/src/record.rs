//! Per-frame result records.
//!
//! A record serializes to one flat JSON object:
//! `{"roi0": [l,t,w,h], "intensity0": x, "spread_intensity0": y, "roi1": ..., "frame_number": n}`.
//! Non-finite measurements are written as `-1` so the output stays valid JSON
//! and consumers can read "measurement invalid" as a plain number.

use crate::aggregate::Measurement;
use crate::types::Roi;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Written in place of a NaN or infinite measurement.
pub const INVALID_MEASUREMENT: i64 = -1;

/// One tracked region's result for a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionRecord {
    pub roi: Roi,
    pub intensity: f64,
    pub spread: Option<f64>,
}

/// All region results for one frame. Built, written, then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    /// 1-based position in the session.
    pub frame_number: usize,
    pub regions: Vec<RegionRecord>,
}

impl FrameRecord {
    /// Pair each region with the measurement at the same index.
    ///
    /// `rois` and `measurements` come from the same tracker update and are
    /// the same length; extra entries on either side are ignored.
    pub fn build(frame_number: usize, rois: &[Roi], measurements: &[Measurement]) -> Self {
        debug_assert_eq!(rois.len(), measurements.len());
        let regions = rois
            .iter()
            .zip(measurements)
            .map(|(roi, m)| RegionRecord {
                roi: *roi,
                intensity: m.aggregate,
                spread: m.spread,
            })
            .collect();
        Self { frame_number, regions }
    }

    /// Number of regions whose aggregate or spread will be written as the sentinel.
    pub fn invalid_count(&self) -> usize {
        self.regions
            .iter()
            .filter(|r| !r.intensity.is_finite() || r.spread.is_some_and(|s| !s.is_finite()))
            .count()
    }
}

/// A measurement as it appears in the output: the value, or `-1` when not finite.
struct Sanitized(f64);

impl Serialize for Sanitized {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.is_finite() {
            serializer.serialize_f64(self.0)
        } else {
            serializer.serialize_i64(INVALID_MEASUREMENT)
        }
    }
}

impl Serialize for FrameRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let per_region = if self.regions.iter().any(|r| r.spread.is_some()) { 3 } else { 2 };
        let mut map = serializer.serialize_map(Some(self.regions.len() * per_region + 1))?;
        for (i, region) in self.regions.iter().enumerate() {
            map.serialize_entry(&format!("roi{i}"), &region.roi)?;
            map.serialize_entry(&format!("intensity{i}"), &Sanitized(region.intensity))?;
            if let Some(spread) = region.spread {
                map.serialize_entry(&format!("spread_intensity{i}"), &Sanitized(spread))?;
            }
        }
        map.serialize_entry("frame_number", &self.frame_number)?;
        map.end()
    }
}
