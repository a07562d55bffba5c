//! Frame and frame dimension types

use image::DynamicImage;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameSize {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
}

impl FrameSize {
    /// Create a new FrameSize
    pub fn from_width_height(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Get total number of pixels
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// True when either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<(u32, u32)> for FrameSize {
    fn from(dimensions: (u32, u32)) -> Self {
        Self::from_width_height(dimensions.0, dimensions.1)
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Error parsing a `WIDTHxHEIGHT` string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected WIDTHxHEIGHT, got {0:?}")]
pub struct FrameSizeParseError(pub String);

impl FromStr for FrameSize {
    type Err = FrameSizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || FrameSizeParseError(s.to_string());
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(err)?;
        let width = w.trim().parse().map_err(|_| err())?;
        let height = h.trim().parse().map_err(|_| err())?;
        Ok(Self { width, height })
    }
}

/// A single raster image pulled from a [`crate::FrameSource`].
#[derive(Debug, Clone)]
pub struct Frame {
    image: DynamicImage,
    frame_number: u64,
}

impl Frame {
    pub fn new(image: DynamicImage, frame_number: u64) -> Self {
        Self {
            image,
            frame_number,
        }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Sequence number assigned by the source, starting at 0
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::from_width_height(self.image.width(), self.image.height())
    }

    /// A frame with no pixels carries nothing worth encoding
    pub fn is_empty(&self) -> bool {
        self.size().is_empty()
    }
}
