//! nirtrack-io — frame sources for recorded dual-sensor footage.
//!
//! Decodes combined visible/infrared frames from a directory of images,
//! one file per frame, in file-name order.

pub mod source;

pub use source::{frame_from_image, ImageSequence, SourceError, IMAGE_EXTENSIONS};
