//! nirtrack-core — ROI tracking and infrared intensity measurement.
//!
//! Splits combined visible/infrared frames into panels, tracks a fixed set
//! of regions on the visible panel, measures the infrared intensities under
//! each region and streams one JSON record per frame.

pub mod aggregate;
pub mod config;
pub mod frame;
pub mod record;
pub mod recorder;
pub mod session;
pub mod split;
pub mod tracker;
pub mod types;

pub use aggregate::{Aggregator, Measurement, Reducer, Statistic};
pub use config::{ConfigError, SessionConfig};
pub use frame::{Frame, FrameError};
pub use record::FrameRecord;
pub use recorder::{OutputSink, RecordWriter, RecorderError};
pub use session::{SessionError, SessionState, TrackingSession};
pub use split::{FramePair, Panel, PanelLayout};
pub use tracker::{MultiTracker, RegionTracker, TrackUpdate, TrackerError};
pub use types::Roi;
