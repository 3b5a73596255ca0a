//! Median-Flow region tracker.
//!
//! Tracks a lattice of points inside the box forward and backward with
//! Lucas-Kanade, keeps the points whose forward-backward error and patch
//! correlation are better than the median, and moves the box by the median
//! point displacement. Scale follows the median change of pairwise point
//! distances.

use super::flow::{patch_ncc, GrayImage, LucasKanade, Pyramid};
use super::{RegionTracker, TrackerError};
use crate::frame::Frame;
use crate::types::Roi;
use serde::Deserialize;

/// Median-Flow tuning.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct MedianFlowParams {
    /// Points per side of the tracking lattice.
    pub grid_size: usize,
    /// Lucas-Kanade patch half-size.
    pub window: usize,
    pub levels: usize,
    pub max_iterations: usize,
    pub epsilon: f32,
    /// Half-size of the patches compared by normalized cross-correlation.
    pub ncc_window: usize,
    /// Largest accepted median deviation of point displacements from the
    /// box displacement, in pixels.
    pub max_displacement_error: f32,
}

impl Default for MedianFlowParams {
    fn default() -> Self {
        Self {
            grid_size: 10,
            window: 5,
            levels: 3,
            max_iterations: 20,
            epsilon: 0.01,
            ncc_window: 5,
            max_displacement_error: 10.0,
        }
    }
}

/// One lattice point after forward-backward tracking.
#[derive(Debug, Clone, Copy)]
struct PointTrack {
    from: (f32, f32),
    to: (f32, f32),
    fb_error: f32,
    ncc: f32,
}

pub struct MedianFlow {
    params: MedianFlowParams,
    lk: LucasKanade,
    prev: Option<Pyramid>,
    roi: Roi,
}

impl MedianFlow {
    pub fn new(params: MedianFlowParams) -> Self {
        Self {
            params,
            lk: LucasKanade {
                window: params.window,
                max_iterations: params.max_iterations,
                epsilon: params.epsilon,
            },
            prev: None,
            roi: Roi::new(0.0, 0.0, 0.0, 0.0),
        }
    }

    /// Box form of [`MedianFlow::new`] for use as a `MultiTracker` factory.
    pub fn boxed(params: MedianFlowParams) -> Box<dyn RegionTracker> {
        Box::new(Self::new(params))
    }

    fn pyramid(&self, frame: &Frame) -> Pyramid {
        let min_size = 2 * self.params.window + 1;
        Pyramid::build(GrayImage::from_frame(frame), self.params.levels, min_size)
    }

    fn lattice(&self) -> Vec<(f32, f32)> {
        let n = self.params.grid_size.max(1);
        let r = &self.roi;
        let mut points = Vec::with_capacity(n * n);
        for row in 0..n {
            for col in 0..n {
                let x = r.left + r.width * (col as f64 + 0.5) / n as f64;
                let y = r.top + r.height * (row as f64 + 0.5) / n as f64;
                points.push((x as f32, y as f32));
            }
        }
        points
    }

    fn track_points(&self, prev: &Pyramid, curr: &Pyramid) -> Vec<PointTrack> {
        self.lattice()
            .into_iter()
            .filter_map(|from| {
                let to = self.lk.track(prev, curr, from.0, from.1)?;
                let back = self.lk.track(curr, prev, to.0, to.1)?;
                let fb_error = distance(from, back);
                let ncc = patch_ncc(prev.base(), from, curr.base(), to, self.params.ncc_window);
                Some(PointTrack { from, to, fb_error, ncc })
            })
            .collect()
    }

    /// Estimate the new box from `prev` to `curr`, or `None` if the motion is unreliable.
    fn estimate(&self, prev: &Pyramid, curr: &Pyramid) -> Option<Roi> {
        let tracks = self.track_points(prev, curr);
        if tracks.is_empty() {
            return None;
        }

        let fb_median = median(tracks.iter().map(|t| t.fb_error).collect())?;
        let ncc_median = median(tracks.iter().map(|t| t.ncc).collect())?;
        let good: Vec<&PointTrack> = tracks
            .iter()
            .filter(|t| t.fb_error <= fb_median && t.ncc >= ncc_median)
            .collect();
        if good.is_empty() {
            return None;
        }

        let dx = median(good.iter().map(|t| t.to.0 - t.from.0).collect())?;
        let dy = median(good.iter().map(|t| t.to.1 - t.from.1).collect())?;

        let deviation = median(
            good.iter()
                .map(|t| distance((t.to.0 - t.from.0, t.to.1 - t.from.1), (dx, dy)))
                .collect(),
        )?;
        if deviation > self.params.max_displacement_error {
            tracing::debug!(deviation, "median-flow displacement too inconsistent");
            return None;
        }

        let scale = pairwise_scale(&good).unwrap_or(1.0) as f64;
        let r = &self.roi;
        let width = r.width * scale;
        let height = r.height * scale;
        let updated = Roi::new(
            r.left + dx as f64 - (width - r.width) / 2.0,
            r.top + dy as f64 - (height - r.height) / 2.0,
            width,
            height,
        );

        let base = curr.base();
        updated.overlaps_image(base.width(), base.height()).then_some(updated)
    }
}

impl RegionTracker for MedianFlow {
    fn init(&mut self, frame: &Frame, roi: Roi) -> Result<(), TrackerError> {
        if frame.is_empty() {
            return Err(TrackerError::EmptyFrame);
        }
        if !frame.is_grayscale() {
            return Err(TrackerError::NotGrayscale {
                channels: frame.channels(),
            });
        }
        self.prev = Some(self.pyramid(frame));
        self.roi = roi;
        Ok(())
    }

    fn update(&mut self, frame: &Frame) -> Option<Roi> {
        let curr = self.pyramid(frame);
        // The reference image advances even when tracking fails.
        let prev = self.prev.replace(curr);
        let curr = self.prev.as_ref()?;
        let updated = self.estimate(prev.as_ref()?, curr)?;
        self.roi = updated;
        Some(updated)
    }
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

fn median(mut values: Vec<f32>) -> Option<f32> {
    values.retain(|v| v.is_finite());
    if values.is_empty() {
        return None;
    }
    values.sort_by(f32::total_cmp);
    let n = values.len();
    Some(if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    })
}

/// Median ratio of current to previous distance over all point pairs.
fn pairwise_scale(tracks: &[&PointTrack]) -> Option<f32> {
    let mut ratios = Vec::new();
    for (i, a) in tracks.iter().enumerate() {
        for b in &tracks[i + 1..] {
            let before = distance(a.from, b.from);
            if before > f32::EPSILON {
                ratios.push(distance(a.to, b.to) / before);
            }
        }
    }
    median(ratios)
}
