//! Tracking session: the per-frame track → measure → record loop.
//!
//! Lifecycle: `Initialized` after construction on the seed frame,
//! `Running` once the first frame has been processed, `Closed` after the
//! output array has been terminated. A closed session rejects further frames.

use crate::aggregate::Aggregator;
use crate::config::{ConfigError, SessionConfig};
use crate::frame::{Frame, FrameError};
use crate::record::FrameRecord;
use crate::recorder::{OutputSink, RecordWriter, RecorderError};
use crate::split::FramePair;
use crate::tracker::{MedianFlow, MultiTracker, TrackerError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),
    #[error("recorder error: {0}")]
    Recorder(#[from] RecorderError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("session is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initialized,
    Running,
    Closed,
}

/// Counters reported when a session closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSummary {
    pub frames: usize,
    /// Frames where at least one region was lost.
    pub degraded_frames: usize,
    /// Region measurements written as the invalid sentinel.
    pub invalid_measurements: usize,
}

pub struct TrackingSession<W: OutputSink> {
    tracker: MultiTracker,
    aggregator: Aggregator,
    recorder: RecordWriter<W>,
    state: SessionState,
    summary: SessionSummary,
}

impl<W: OutputSink> TrackingSession<W> {
    /// Start a session with the Median-Flow tracker and the configured statistics.
    ///
    /// `seed` is the grayscale visible frame the seed regions refer to.
    pub fn start(config: &SessionConfig, seed: &Frame, recorder: RecordWriter<W>) -> Result<Self, SessionError> {
        config.validate()?;
        let params = config.median_flow;
        let tracker = MultiTracker::new(&config.rois, seed, || MedianFlow::boxed(params))?;
        let aggregator = Aggregator::from_statistics(config.aggregate, config.spread);
        tracing::info!(
            regions = config.rois.len(),
            aggregate = %config.aggregate,
            spread = ?config.spread,
            "tracking session started"
        );
        Ok(Self::with_parts(tracker, aggregator, recorder))
    }

    /// Start a session from an already initialized tracker.
    pub fn with_parts(tracker: MultiTracker, aggregator: Aggregator, recorder: RecordWriter<W>) -> Self {
        Self {
            tracker,
            aggregator,
            recorder,
            state: SessionState::Initialized,
            summary: SessionSummary::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn summary(&self) -> SessionSummary {
        self.summary
    }

    /// Track, measure and record one frame pair. Returns the written record.
    pub fn step(&mut self, pair: &FramePair) -> Result<FrameRecord, SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }

        let update = self.tracker.update(&pair.visible)?;
        let measurements = self.aggregator.measure_all(&update.rois, &pair.infrared);
        let record = FrameRecord::build(self.summary.frames + 1, &update.rois, &measurements);
        self.recorder.append(&record)?;

        self.state = SessionState::Running;
        self.summary.frames += 1;
        if !update.success {
            self.summary.degraded_frames += 1;
        }
        self.summary.invalid_measurements += record.invalid_count();
        tracing::debug!(frame = record.frame_number, seq = pair.visible.sequence, "recorded frame");
        Ok(record)
    }

    /// Terminate the output array. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<SessionSummary, SessionError> {
        if self.state != SessionState::Closed {
            self.recorder.close()?;
            self.state = SessionState::Closed;
            tracing::info!(
                frames = self.summary.frames,
                degraded = self.summary.degraded_frames,
                invalid = self.summary.invalid_measurements,
                "tracking session closed"
            );
        }
        Ok(self.summary)
    }

    /// Close the session and return the output destination.
    pub fn into_output(mut self) -> Result<W, SessionError> {
        self.close()?;
        Ok(self.recorder.finish()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Statistic;
    use crate::recorder::{check_frame_numbers, read_records};
    use crate::split::PanelLayout;
    use crate::tracker::testing::ScriptedTracker;
    use crate::types::Roi;
    use ndarray::Array3;
    use serde_json::json;
    use std::io::Cursor;

    fn output() -> RecordWriter<Cursor<Vec<u8>>> {
        RecordWriter::new(Cursor::new(Vec::new())).unwrap()
    }

    fn seeds() -> Vec<Roi> {
        vec![Roi::new(10.0, 100.0, 30.0, 50.0), Roi::new(100.0, 100.0, 50.0, 30.0)]
    }

    /// Pinpoint-sized combined frame: visible half flat, infrared half a
    /// horizontal ramp so intensities depend on column.
    fn combined(seq: u32) -> Frame {
        let data = Array3::from_shape_fn((720, 480, 3), |(y, x, _)| if y < 360 { 90 } else { (x / 2) as u8 });
        Frame::new(data, seq)
    }

    fn pair(seq: u32) -> FramePair {
        PanelLayout::PINPOINT.split_for_tracking(&combined(seq)).unwrap()
    }

    fn scripted_session(fail_second_on: &[u32]) -> TrackingSession<Cursor<Vec<u8>>> {
        let mut calls = 0;
        let tracker = MultiTracker::new(&seeds(), &pair(0).visible, || {
            calls += 1;
            if calls == 2 {
                ScriptedTracker::boxed(fail_second_on)
            } else {
                ScriptedTracker::boxed(&[])
            }
        })
        .unwrap();
        let aggregator = Aggregator::from_statistics(Statistic::Median, Some(Statistic::Std));
        TrackingSession::with_parts(tracker, aggregator, output())
    }

    #[test]
    fn test_three_frame_session_output() {
        let mut session = scripted_session(&[]);
        assert_eq!(session.state(), SessionState::Initialized);
        for seq in 1..=3 {
            session.step(&pair(seq)).unwrap();
            assert_eq!(session.state(), SessionState::Running);
        }
        let bytes = session.into_output().unwrap().into_inner();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with('['));
        assert!(text.ends_with(']'));
        assert!(!text.contains(",\n]"));

        let records = read_records(text.as_bytes()).unwrap();
        assert_eq!(check_frame_numbers(&records).unwrap(), 3);
        let keys = [
            "roi0",
            "intensity0",
            "spread_intensity0",
            "roi1",
            "intensity1",
            "spread_intensity1",
            "frame_number",
        ];
        for record in &records {
            assert_eq!(record.len(), keys.len());
            for key in keys {
                assert!(record.contains_key(key), "missing {key}");
            }
        }
        // Scripted tracker moves one pixel right per frame
        assert_eq!(records[2]["roi0"], json!([13.0, 100.0, 30.0, 50.0]));
    }

    #[test]
    fn test_partial_failure_still_records_every_frame() {
        let mut session = scripted_session(&[2]);
        for seq in 1..=3 {
            session.step(&pair(seq)).unwrap();
        }
        assert_eq!(session.summary().degraded_frames, 1);
        let records = read_records(session.into_output().unwrap().into_inner().as_slice()).unwrap();
        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(record.len(), 7);
        }
        // Stale on frame 2, moving again on frame 3
        assert_eq!(records[0]["roi1"], json!([101.0, 100.0, 50.0, 30.0]));
        assert_eq!(records[1]["roi1"], json!([101.0, 100.0, 50.0, 30.0]));
        assert_eq!(records[2]["roi1"], json!([102.0, 100.0, 50.0, 30.0]));
    }

    #[test]
    fn test_roi_outside_infrared_is_sentinel() {
        let tracker = MultiTracker::new(
            &[Roi::new(10.0, 10.0, 20.0, 20.0), Roi::new(600.0, 10.0, 20.0, 20.0)],
            &pair(0).visible,
            || ScriptedTracker::boxed(&[]),
        )
        .unwrap();
        let aggregator = Aggregator::from_statistics(Statistic::Median, Some(Statistic::Std));
        let mut session = TrackingSession::with_parts(tracker, aggregator, output());

        let record = session.step(&pair(1)).unwrap();
        assert!(record.regions[1].intensity.is_nan());
        assert_eq!(session.summary().invalid_measurements, 1);

        let records = read_records(session.into_output().unwrap().into_inner().as_slice()).unwrap();
        assert_eq!(records[0]["intensity1"], json!(-1));
        assert_eq!(records[0]["spread_intensity1"], json!(-1));
        // Columns 11..31 of the ramp hold values 5..15
        assert_eq!(records[0]["intensity0"], json!(10.0));
    }

    #[test]
    fn test_step_after_close_is_rejected() {
        let mut session = scripted_session(&[]);
        session.step(&pair(1)).unwrap();
        let summary = session.close().unwrap();
        assert_eq!(summary.frames, 1);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(session.step(&pair(2)), Err(SessionError::Closed)));
        // Second close is harmless
        session.close().unwrap();
        let records = read_records(session.into_output().unwrap().into_inner().as_slice()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_start_rejects_empty_rois() {
        let config = SessionConfig::default();
        let result = TrackingSession::start(&config, &pair(0).visible, output());
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[test]
    fn test_start_rejects_color_seed_frame() {
        let config = SessionConfig {
            rois: seeds(),
            ..SessionConfig::default()
        };
        let color = PanelLayout::PINPOINT.split(&combined(0)).unwrap().visible;
        let result = TrackingSession::start(&config, &color, output());
        assert!(matches!(result, Err(SessionError::Tracker(TrackerError::NotGrayscale { channels: 3 }))));
    }

    #[test]
    fn test_start_with_median_flow_on_flat_scene() {
        let config = SessionConfig {
            rois: seeds(),
            spread: Some(Statistic::Std),
            ..SessionConfig::default()
        };
        let mut session = TrackingSession::start(&config, &pair(0).visible, output()).unwrap();
        // Flat visible panel: every region is lost and stays at its seed
        let record = session.step(&pair(1)).unwrap();
        assert_eq!(record.regions[0].roi, seeds()[0]);
        assert_eq!(session.summary().degraded_frames, 1);
        let records = read_records(session.into_output().unwrap().into_inner().as_slice()).unwrap();
        assert_eq!(records.len(), 1);
    }
}
