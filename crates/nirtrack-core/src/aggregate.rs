//! Infrared intensity statistics over tracked regions.
//!
//! A region is mapped to whole pixels by truncating its edges toward zero,
//! clipped to the infrared frame, and reduced with a pluggable [`Reducer`].
//! Empty selections reduce to NaN; the recorder turns that into `-1`.

use crate::frame::Frame;
use crate::types::Roi;
use ndarray::{s, ArrayView3};
use serde::Deserialize;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Maps the samples of a region (rows × cols × channels) to one scalar.
pub trait Reducer {
    fn reduce(&self, pixels: ArrayView3<'_, u8>) -> f64;
}

impl<F> Reducer for F
where
    F: Fn(ArrayView3<'_, u8>) -> f64,
{
    fn reduce(&self, pixels: ArrayView3<'_, u8>) -> f64 {
        self(pixels)
    }
}

/// Built-in reducers. All of them return NaN for an empty selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    #[default]
    Median,
    Mean,
    /// Population standard deviation.
    Std,
    Min,
    Max,
}

impl Reducer for Statistic {
    fn reduce(&self, pixels: ArrayView3<'_, u8>) -> f64 {
        if pixels.is_empty() {
            return f64::NAN;
        }
        match self {
            Statistic::Median => median(pixels),
            Statistic::Mean => mean(pixels),
            Statistic::Std => std_dev(pixels),
            Statistic::Min => pixels.iter().copied().min().map_or(f64::NAN, f64::from),
            Statistic::Max => pixels.iter().copied().max().map_or(f64::NAN, f64::from),
        }
    }
}

fn median(pixels: ArrayView3<'_, u8>) -> f64 {
    // Counting sort over the 8-bit range
    let mut hist = [0usize; 256];
    for &p in pixels.iter() {
        hist[p as usize] += 1;
    }
    let n = pixels.len();
    let nth = |k: usize| -> f64 {
        let mut seen = 0;
        for (value, &count) in hist.iter().enumerate() {
            seen += count;
            if seen > k {
                return value as f64;
            }
        }
        f64::NAN
    };
    if n % 2 == 1 {
        nth(n / 2)
    } else {
        (nth(n / 2 - 1) + nth(n / 2)) / 2.0
    }
}

fn mean(pixels: ArrayView3<'_, u8>) -> f64 {
    pixels.iter().map(|&p| p as f64).sum::<f64>() / pixels.len() as f64
}

fn std_dev(pixels: ArrayView3<'_, u8>) -> f64 {
    let m = mean(pixels);
    let variance = pixels.iter().map(|&p| (p as f64 - m).powi(2)).sum::<f64>() / pixels.len() as f64;
    variance.sqrt()
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Statistic::Median => "median",
            Statistic::Mean => "mean",
            Statistic::Std => "std",
            Statistic::Min => "min",
            Statistic::Max => "max",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown statistic '{0}' (expected median, mean, std, min or max)")]
pub struct ParseStatisticError(String);

impl FromStr for Statistic {
    type Err = ParseStatisticError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "median" => Ok(Statistic::Median),
            "mean" | "average" => Ok(Statistic::Mean),
            "std" | "stddev" => Ok(Statistic::Std),
            "min" => Ok(Statistic::Min),
            "max" => Ok(Statistic::Max),
            _ => Err(ParseStatisticError(s.to_string())),
        }
    }
}

/// Whole-pixel rows and columns covered by a region, before clipping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelWindow {
    pub rows: Range<i64>,
    pub cols: Range<i64>,
}

impl PixelWindow {
    /// Truncate each edge toward zero: `[top, top+height) × [left, left+width)`.
    pub fn from_roi(roi: &Roi) -> Self {
        Self {
            rows: roi.top as i64..roi.bottom() as i64,
            cols: roi.left as i64..roi.right() as i64,
        }
    }

    /// Clip to a `height × width` image. May produce empty ranges.
    pub fn clip(&self, height: usize, width: usize) -> (Range<usize>, Range<usize>) {
        (clip_range(&self.rows, height), clip_range(&self.cols, width))
    }
}

fn clip_range(r: &Range<i64>, len: usize) -> Range<usize> {
    let len = len as i64;
    let start = r.start.clamp(0, len);
    let end = r.end.clamp(start, len);
    start as usize..end as usize
}

/// Aggregate and optional spread for one region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub aggregate: f64,
    pub spread: Option<f64>,
}

/// Applies the configured reducers to infrared regions.
pub struct Aggregator {
    aggregate: Box<dyn Reducer>,
    spread: Option<Box<dyn Reducer>>,
}

impl Aggregator {
    pub fn new(aggregate: impl Reducer + 'static) -> Self {
        Self {
            aggregate: Box::new(aggregate),
            spread: None,
        }
    }

    pub fn with_spread(mut self, spread: impl Reducer + 'static) -> Self {
        self.spread = Some(Box::new(spread));
        self
    }

    pub fn from_statistics(aggregate: Statistic, spread: Option<Statistic>) -> Self {
        let agg = Self::new(aggregate);
        match spread {
            Some(s) => agg.with_spread(s),
            None => agg,
        }
    }

    /// Reduce the infrared samples under `roi`.
    pub fn measure(&self, roi: &Roi, infrared: &Frame) -> Measurement {
        let (rows, cols) = PixelWindow::from_roi(roi).clip(infrared.height(), infrared.width());
        let pixels = infrared.data.slice(s![rows, cols, ..]);
        Measurement {
            aggregate: self.aggregate.reduce(pixels),
            spread: self.spread.as_ref().map(|f| f.reduce(pixels)),
        }
    }

    /// Measure every region, preserving order.
    pub fn measure_all(&self, rois: &[Roi], infrared: &Frame) -> Vec<Measurement> {
        rois.iter().map(|roi| self.measure(roi, infrared)).collect()
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(Statistic::Median)
    }
}
