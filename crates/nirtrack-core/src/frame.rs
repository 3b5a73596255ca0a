//! Frame type and pixel conversions: channel layout, grayscale luma.

use ndarray::{s, Array3};

/// A decoded video frame.
///
/// Samples are stored row-major as `(rows, cols, channels)`. Grayscale
/// frames have a single channel; colour frames are RGB or RGBA.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub data: Array3<u8>,
    /// Position of this frame in its source.
    pub sequence: u32,
}

impl Frame {
    pub fn new(data: Array3<u8>, sequence: u32) -> Self {
        Self { data, sequence }
    }

    /// Build a frame from interleaved pixel bytes.
    pub fn from_raw(
        pixels: Vec<u8>,
        width: usize,
        height: usize,
        channels: usize,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        let expected = width * height * channels;
        if pixels.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: pixels.len(),
            });
        }
        let data = Array3::from_shape_vec((height, width, channels), pixels)
            .map_err(|e| FrameError::InvalidShape(e.to_string()))?;
        Ok(Self { data, sequence })
    }

    /// Single-channel frame filled with one value.
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self::new(Array3::from_elem((height, width, 1), value), 0)
    }

    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_grayscale(&self) -> bool {
        self.channels() == 1
    }

    /// Copy out the rows `top..top+height` and columns `left..left+width`.
    pub fn crop(&self, top: usize, left: usize, height: usize, width: usize) -> Result<Frame, FrameError> {
        if top + height > self.height() || left + width > self.width() {
            return Err(FrameError::Undersized {
                required_rows: top + height,
                required_cols: left + width,
                rows: self.height(),
                cols: self.width(),
            });
        }
        let data = self
            .data
            .slice(s![top..top + height, left..left + width, ..])
            .to_owned();
        Ok(Frame::new(data, self.sequence))
    }

    /// Convert to a single-channel frame using BT.601 luma weights.
    ///
    /// Grayscale frames are returned as a copy. RGBA ignores alpha.
    pub fn to_grayscale(&self) -> Result<Frame, FrameError> {
        match self.channels() {
            1 => Ok(self.clone()),
            3 | 4 => {
                let (h, w, _) = self.data.dim();
                let gray = Array3::from_shape_fn((h, w, 1), |(y, x, _)| {
                    let r = self.data[[y, x, 0]] as f32;
                    let g = self.data[[y, x, 1]] as f32;
                    let b = self.data[[y, x, 2]] as f32;
                    luma(r, g, b)
                });
                Ok(Frame::new(gray, self.sequence))
            }
            channels => Err(FrameError::UnsupportedChannels(channels)),
        }
    }
}

fn luma(r: f32, g: f32, b: f32) -> u8 {
    (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid pixel buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid frame shape: {0}")]
    InvalidShape(String),
    #[error("frame too small: need {required_rows}x{required_cols} (rows x cols), got {rows}x{cols}")]
    Undersized {
        required_rows: usize,
        required_cols: usize,
        rows: usize,
        cols: usize,
    },
    #[error("unsupported channel count: {0} (need 1, 3 or 4)")]
    UnsupportedChannels(usize),
}
