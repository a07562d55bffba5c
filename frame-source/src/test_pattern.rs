//! Synthetic frame source for demos and tests.

use crate::{Frame, FrameSize, FrameSource, SourceError, SourceResult};
use image::{DynamicImage, ImageBuffer, Rgb};

/// Generates a moving RGB gradient so successive frames differ.
pub struct TestPatternSource {
    size: FrameSize,
    frame_count: u64,
    native_fps: Option<u32>,
    name: String,
    released: bool,
}

impl TestPatternSource {
    pub fn new(size: FrameSize) -> Self {
        Self {
            size,
            frame_count: 0,
            native_fps: None,
            name: format!("test-pattern {size}"),
            released: false,
        }
    }

    /// Report a native frame rate, as a real camera would
    pub fn with_native_fps(mut self, fps: u32) -> Self {
        self.native_fps = Some(fps);
        self
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_count
    }

    fn render(&self) -> DynamicImage {
        let offset = (self.frame_count * 4 % 256) as u32;
        let img = ImageBuffer::from_fn(self.size.width, self.size.height, |x, y| {
            Rgb([
                ((x + offset) % 256) as u8,
                (y % 256) as u8,
                (offset * 2 % 256) as u8,
            ])
        });
        DynamicImage::ImageRgb8(img)
    }
}

impl FrameSource for TestPatternSource {
    fn next_frame(&mut self) -> SourceResult<Option<Frame>> {
        if self.released {
            return Err(SourceError::Released);
        }
        let frame = Frame::new(self.render(), self.frame_count);
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) -> SourceResult<()> {
        self.released = true;
        Ok(())
    }

    fn native_fps(&self) -> Option<u32> {
        self.native_fps
    }

    fn name(&self) -> &str {
        &self.name
    }
}
