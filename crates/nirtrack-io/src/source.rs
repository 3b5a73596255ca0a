//! Image-sequence frame source via the `image` crate.

use image::DynamicImage;
use nirtrack_core::{Frame, FrameError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions treated as frames (case-insensitive).
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("frame directory not found: {0}")]
    NotFound(String),
    #[error("failed to list {path}: {source}")]
    List {
        path: String,
        source: std::io::Error,
    },
    #[error("no image files in {0}")]
    Empty(String),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        source: image::ImageError,
    },
    #[error("bad frame: {0}")]
    Frame(#[from] FrameError),
}

/// Ordered image files read lazily as [`Frame`]s.
///
/// A frame's `sequence` is its index in the full listing, so skipped
/// frames still count.
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    next: usize,
    remaining: Option<usize>,
}

impl ImageSequence {
    /// List the image files in `dir`, sorted by file name.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SourceError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(SourceError::NotFound(dir.display().to_string()));
        }

        let list_err = |source| SourceError::List {
            path: dir.display().to_string(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(list_err)? {
            let path = entry.map_err(list_err)?.path();
            if path.is_file() && is_image(&path) {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return Err(SourceError::Empty(dir.display().to_string()));
        }
        paths.sort();

        tracing::info!(dir = %dir.display(), frames = paths.len(), "opened image sequence");
        Ok(Self::from_paths(paths))
    }

    /// Read exactly these files, in this order.
    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            next: 0,
            remaining: None,
        }
    }

    /// Start `n` frames into the sequence.
    pub fn skip_frames(mut self, n: usize) -> Self {
        self.next = n.min(self.paths.len());
        if n > 0 {
            tracing::debug!(skipped = self.next, "skipping leading frames");
        }
        self
    }

    /// Yield at most `n` more frames.
    pub fn limit(mut self, n: usize) -> Self {
        self.remaining = Some(n);
        self
    }

    /// Frames still to be yielded.
    pub fn len(&self) -> usize {
        let left = self.paths.len() - self.next;
        self.remaining.map_or(left, |r| r.min(left))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Iterator for ImageSequence {
    type Item = Result<Frame, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        let path = self.paths.get(self.next)?;
        let sequence = self.next as u32;
        self.next += 1;
        if let Some(r) = self.remaining.as_mut() {
            *r -= 1;
        }
        Some(load_frame(path, sequence))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.len();
        (n, Some(n))
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

fn load_frame(path: &Path, sequence: u32) -> Result<Frame, SourceError> {
    let image = image::open(path).map_err(|source| SourceError::Decode {
        path: path.display().to_string(),
        source,
    })?;
    tracing::trace!(path = %path.display(), sequence, "decoded frame");
    frame_from_image(image, sequence)
}

/// Convert a decoded image to a frame: grayscale images keep one channel,
/// everything else becomes 8-bit RGB. Alpha is dropped.
pub fn frame_from_image(image: DynamicImage, sequence: u32) -> Result<Frame, SourceError> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let frame = if image.color().has_color() {
        Frame::from_raw(image.into_rgb8().into_raw(), width, height, 3, sequence)?
    } else {
        Frame::from_raw(image.into_luma8().into_raw(), width, height, 1, sequence)?
    };
    Ok(frame)
}
