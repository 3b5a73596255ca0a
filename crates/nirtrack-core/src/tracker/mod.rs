//! Region tracking across visible-light frames.
//!
//! Each region is followed by its own [`RegionTracker`]. [`MultiTracker`]
//! keeps the regions in seed order and tolerates per-region failure: a lost
//! region keeps its last known rectangle and the session carries on.

pub mod flow;
pub mod median_flow;

pub use median_flow::{MedianFlow, MedianFlowParams};

use crate::frame::Frame;
use crate::types::Roi;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("no seed regions given")]
    NoSeeds,
    #[error("tracking frame is empty")]
    EmptyFrame,
    #[error("tracking frame must be grayscale, got {channels} channels")]
    NotGrayscale { channels: usize },
    #[error("invalid seed region {index}: {roi:?}")]
    InvalidSeed { index: usize, roi: Roi },
}

/// A single-region visual tracker.
pub trait RegionTracker {
    /// Start tracking `roi` on `frame`.
    fn init(&mut self, frame: &Frame, roi: Roi) -> Result<(), TrackerError>;

    /// Locate the region in the next frame. `None` means the region was lost.
    fn update(&mut self, frame: &Frame) -> Option<Roi>;
}

/// Outcome of one [`MultiTracker::update`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrackUpdate {
    /// One rectangle per seed, in seed order. Lost regions keep their previous rectangle.
    pub rois: Vec<Roi>,
    /// False if any region was lost this frame.
    pub success: bool,
    /// Indices of the regions lost this frame.
    pub lost: Vec<usize>,
}

/// A fixed, ordered set of independently tracked regions.
pub struct MultiTracker {
    trackers: Vec<Box<dyn RegionTracker>>,
    rois: Vec<Roi>,
}

impl MultiTracker {
    /// Initialize one tracker per seed on the grayscale `frame`.
    ///
    /// `factory` builds a fresh, uninitialized tracker for each region.
    pub fn new<F>(seeds: &[Roi], frame: &Frame, mut factory: F) -> Result<Self, TrackerError>
    where
        F: FnMut() -> Box<dyn RegionTracker>,
    {
        if seeds.is_empty() {
            return Err(TrackerError::NoSeeds);
        }
        check_tracking_frame(frame)?;

        let mut trackers = Vec::with_capacity(seeds.len());
        for (index, roi) in seeds.iter().enumerate() {
            if !roi.is_valid_seed() {
                return Err(TrackerError::InvalidSeed { index, roi: *roi });
            }
            let mut tracker = factory();
            tracker.init(frame, *roi)?;
            trackers.push(tracker);
        }

        tracing::info!(regions = seeds.len(), "tracker initialized");
        Ok(Self {
            trackers,
            rois: seeds.to_vec(),
        })
    }

    /// Current rectangles, in seed order.
    pub fn rois(&self) -> &[Roi] {
        &self.rois
    }

    /// Advance every region to `frame`.
    ///
    /// Per-region failure is not an error: the region keeps its stale
    /// rectangle, `success` is false and a warning is logged.
    pub fn update(&mut self, frame: &Frame) -> Result<TrackUpdate, TrackerError> {
        check_tracking_frame(frame)?;

        let mut lost = Vec::new();
        for (index, (tracker, roi)) in self.trackers.iter_mut().zip(self.rois.iter_mut()).enumerate() {
            match tracker.update(frame) {
                Some(updated) => *roi = updated,
                None => lost.push(index),
            }
        }

        if !lost.is_empty() {
            tracing::warn!(seq = frame.sequence, ?lost, "at least one ROI was not detected");
        }

        Ok(TrackUpdate {
            rois: self.rois.clone(),
            success: lost.is_empty(),
            lost,
        })
    }
}

fn check_tracking_frame(frame: &Frame) -> Result<(), TrackerError> {
    if frame.is_empty() {
        return Err(TrackerError::EmptyFrame);
    }
    if !frame.is_grayscale() {
        return Err(TrackerError::NotGrayscale {
            channels: frame.channels(),
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashSet;

    /// Moves its region one pixel right per update; fails on the listed
    /// frame sequence numbers.
    pub(crate) struct ScriptedTracker {
        roi: Option<Roi>,
        fail_on: HashSet<u32>,
    }

    impl ScriptedTracker {
        pub(crate) fn boxed(fail_on: &[u32]) -> Box<dyn RegionTracker> {
            Box::new(Self {
                roi: None,
                fail_on: fail_on.iter().copied().collect(),
            })
        }
    }

    impl RegionTracker for ScriptedTracker {
        fn init(&mut self, _frame: &Frame, roi: Roi) -> Result<(), TrackerError> {
            self.roi = Some(roi);
            Ok(())
        }

        fn update(&mut self, frame: &Frame) -> Option<Roi> {
            if self.fail_on.contains(&frame.sequence) {
                return None;
            }
            let roi = self.roi.as_mut()?;
            roi.left += 1.0;
            Some(*roi)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedTracker;
    use super::*;
    use ndarray::Array3;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    fn gray(seq: u32) -> Frame {
        Frame::new(Array3::zeros((20, 20, 1)), seq)
    }

    fn seeds() -> Vec<Roi> {
        vec![Roi::new(1.0, 1.0, 4.0, 4.0), Roi::new(10.0, 10.0, 3.0, 3.0)]
    }

    #[test]
    fn test_new_rejects_empty_seeds() {
        let result = MultiTracker::new(&[], &gray(0), || ScriptedTracker::boxed(&[]));
        assert!(matches!(result, Err(TrackerError::NoSeeds)));
    }

    #[test]
    fn test_new_rejects_color_frame() {
        let color = Frame::new(Array3::zeros((20, 20, 3)), 0);
        let result = MultiTracker::new(&seeds(), &color, || ScriptedTracker::boxed(&[]));
        assert!(matches!(result, Err(TrackerError::NotGrayscale { channels: 3 })));
    }

    #[test]
    fn test_new_rejects_empty_frame() {
        let empty = Frame::new(Array3::zeros((0, 0, 1)), 0);
        let result = MultiTracker::new(&seeds(), &empty, || ScriptedTracker::boxed(&[]));
        assert!(matches!(result, Err(TrackerError::EmptyFrame)));
    }

    #[test]
    fn test_new_rejects_invalid_seed() {
        let bad = vec![Roi::new(1.0, 1.0, 4.0, 4.0), Roi::new(-2.0, 1.0, 4.0, 4.0)];
        let result = MultiTracker::new(&bad, &gray(0), || ScriptedTracker::boxed(&[]));
        assert!(matches!(result, Err(TrackerError::InvalidSeed { index: 1, .. })));
    }

    #[test]
    fn test_update_moves_all_regions() {
        let mut mt = MultiTracker::new(&seeds(), &gray(0), || ScriptedTracker::boxed(&[])).unwrap();
        let update = mt.update(&gray(1)).unwrap();
        assert!(update.success);
        assert!(update.lost.is_empty());
        assert_eq!(update.rois[0].left, 2.0);
        assert_eq!(update.rois[1].left, 11.0);
        assert_eq!(mt.rois(), update.rois.as_slice());
    }

    #[test]
    fn test_partial_failure_keeps_stale_roi() {
        let mut calls = 0;
        let factory = || {
            calls += 1;
            // Second region fails on frame 2
            if calls == 2 {
                ScriptedTracker::boxed(&[2])
            } else {
                ScriptedTracker::boxed(&[])
            }
        };
        let mut mt = MultiTracker::new(&seeds(), &gray(0), factory).unwrap();
        mt.update(&gray(1)).unwrap();
        let update = mt.update(&gray(2)).unwrap();

        assert!(!update.success);
        assert_eq!(update.lost, vec![1]);
        assert_eq!(update.rois.len(), 2);
        assert_eq!(update.rois[0].left, 3.0);
        // Stale: still the frame-1 position
        assert_eq!(update.rois[1].left, 11.0);
    }

    /// Log sink shared between the subscriber and the test.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_partial_failure_logs_warning_with_lost_indices() {
        let mut calls = 0;
        let mut mt = MultiTracker::new(&seeds(), &gray(0), || {
            calls += 1;
            let fail_on: &[u32] = if calls == 2 { &[2] } else { &[] };
            ScriptedTracker::boxed(fail_on)
        })
        .unwrap();

        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            assert!(mt.update(&gray(1)).unwrap().success);
            assert!(!mt.update(&gray(2)).unwrap().success);
        });

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let warnings: Vec<&str> = output.lines().filter(|l| l.contains("WARN")).collect();
        assert_eq!(warnings.len(), 1, "{output}");
        assert!(warnings[0].contains("at least one ROI was not detected"), "{output}");
        assert!(warnings[0].contains("lost=[1]"), "{output}");
        assert!(warnings[0].contains("seq=2"), "{output}");
    }

    #[test]
    fn test_update_length_matches_seeds_on_total_failure() {
        let mut mt = MultiTracker::new(&seeds(), &gray(0), || ScriptedTracker::boxed(&[1])).unwrap();
        let update = mt.update(&gray(1)).unwrap();
        assert!(!update.success);
        assert_eq!(update.rois, seeds());
        assert_eq!(update.lost, vec![0, 1]);
    }

    #[test]
    fn test_update_rejects_color_frame() {
        let mut mt = MultiTracker::new(&seeds(), &gray(0), || ScriptedTracker::boxed(&[])).unwrap();
        let color = Frame::new(Array3::zeros((20, 20, 3)), 1);
        assert!(matches!(mt.update(&color), Err(TrackerError::NotGrayscale { .. })));
    }
}
