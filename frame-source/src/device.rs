//! Capture device source (V4L2).
//!
//! Devices are addressed by index (`/dev/videoN`). The driver is asked for
//! Motion-JPEG first since most USB cameras deliver it natively; YUYV is
//! accepted as a fallback and converted to RGB.
//!
//! The V4L2 backend is only compiled on Linux with the `v4l2` feature.
//! Without it, [`open_device`] reports [`SourceError::Unsupported`].

use crate::{FrameSource, SourceError, SourceResult};
use image::RgbImage;

/// Convert packed YUYV 4:2:2 into RGB (BT.601, limited range).
///
/// Returns `None` if `data` is shorter than `width * height * 2` bytes.
pub fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Option<RgbImage> {
    let pixels = width as usize * height as usize;
    if data.len() < pixels * 2 || width % 2 != 0 {
        return None;
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in data[..pixels * 2].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        for y in [y0, y1] {
            let c = y as f32 - 16.0;
            let d = u as f32 - 128.0;
            let e = v as f32 - 128.0;
            let r = 1.164 * c + 1.596 * e;
            let g = 1.164 * c - 0.392 * d - 0.813 * e;
            let b = 1.164 * c + 2.017 * d;
            rgb.extend([r, g, b].map(|ch| ch.round().clamp(0.0, 255.0) as u8));
        }
    }
    RgbImage::from_raw(width, height, rgb)
}

#[cfg(all(target_os = "linux", feature = "v4l2"))]
mod v4l2 {
    use super::yuyv_to_rgb;
    use crate::{Frame, FrameSource, SourceError, SourceResult};
    use image::{DynamicImage, ImageFormat};
    use std::time::Duration;
    use tracing::{info, warn};
    use v4l::buffer::Type;
    use v4l::io::mmap::Stream as MmapStream;
    use v4l::io::traits::CaptureStream;
    use v4l::prelude::*;
    use v4l::video::Capture;
    use v4l::FourCC;

    /// Time given to the driver to settle after opening, before the first read
    const OPEN_SETTLE: Duration = Duration::from_millis(250);

    pub struct DeviceSource {
        name: String,
        stream: Option<MmapStream<'static>>,
        fourcc: FourCC,
        width: u32,
        height: u32,
        native_fps: Option<u32>,
        frame_count: u64,
    }

    impl DeviceSource {
        pub fn open(index: u32) -> SourceResult<Self> {
            let path = format!("/dev/video{index}");
            let open_err = |reason: String| SourceError::Open {
                identifier: path.clone(),
                reason,
            };

            let device = Device::with_path(&path).map_err(|e| open_err(e.to_string()))?;

            let mut format = device.format().map_err(|e| open_err(e.to_string()))?;
            format.fourcc = FourCC::new(b"MJPG");
            let format = device
                .set_format(&format)
                .map_err(|e| open_err(e.to_string()))?;

            if format.fourcc != FourCC::new(b"MJPG") && format.fourcc != FourCC::new(b"YUYV") {
                return Err(open_err(format!(
                    "unsupported pixel format {}",
                    format.fourcc
                )));
            }

            let native_fps = device.params().ok().and_then(|params| {
                let interval = params.interval;
                (interval.numerator > 0).then(|| interval.denominator / interval.numerator)
            });

            // The stream holds its own handle to the device
            let stream = MmapStream::new(&device, Type::VideoCapture)
                .map_err(|e| open_err(e.to_string()))?;

            info!(
                "Opened {path}: {}x{} {} at {:?} fps",
                format.width, format.height, format.fourcc, native_fps
            );
            std::thread::sleep(OPEN_SETTLE);

            Ok(Self {
                name: path,
                stream: Some(stream),
                fourcc: format.fourcc,
                width: format.width,
                height: format.height,
                native_fps,
                frame_count: 0,
            })
        }
    }

    impl FrameSource for DeviceSource {
        fn next_frame(&mut self) -> SourceResult<Option<Frame>> {
            let stream = self.stream.as_mut().ok_or(SourceError::Released)?;
            let (buf, meta) = stream.next()?;
            let used = (meta.bytesused as usize).min(buf.len());
            let data = &buf[..used];
            if data.is_empty() {
                return Ok(None);
            }

            let image = if self.fourcc == FourCC::new(b"MJPG") {
                image::load_from_memory_with_format(data, ImageFormat::Jpeg)?
            } else {
                let rgb = yuyv_to_rgb(data, self.width, self.height).ok_or_else(|| {
                    SourceError::Capture(format!("short YUYV buffer ({used} bytes)"))
                })?;
                DynamicImage::ImageRgb8(rgb)
            };

            let frame = Frame::new(image, self.frame_count);
            self.frame_count += 1;
            Ok(Some(frame))
        }

        fn release(&mut self) -> SourceResult<()> {
            if self.stream.take().is_some() {
                info!("Released {}", self.name);
            } else {
                warn!("{} already released", self.name);
            }
            Ok(())
        }

        fn native_fps(&self) -> Option<u32> {
            self.native_fps
        }

        fn name(&self) -> &str {
            &self.name
        }
    }
}

#[cfg(all(target_os = "linux", feature = "v4l2"))]
pub use v4l2::DeviceSource;

/// Open capture device `index` as a boxed [`FrameSource`].
pub fn open_device(index: u32) -> SourceResult<Box<dyn FrameSource>> {
    #[cfg(all(target_os = "linux", feature = "v4l2"))]
    {
        Ok(Box::new(DeviceSource::open(index)?))
    }

    #[cfg(not(all(target_os = "linux", feature = "v4l2")))]
    {
        Err(SourceError::Unsupported(format!(
            "capture device {index} requires the `v4l2` feature on Linux"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_rgb_gray() {
        // Y=126, U=V=128 is mid gray
        let data = [126u8, 128, 126, 128, 126, 128, 126, 128];
        let rgb = yuyv_to_rgb(&data, 2, 2).unwrap();
        for pixel in rgb.pixels() {
            assert_eq!(pixel.0[0], pixel.0[1]);
            assert_eq!(pixel.0[1], pixel.0[2]);
            assert!((pixel.0[0] as i32 - 128).abs() <= 1);
        }
    }

    #[test]
    fn test_yuyv_to_rgb_clamps() {
        let data = [255u8, 255, 255, 255];
        let rgb = yuyv_to_rgb(&data, 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0[2], 255);
    }

    #[test]
    fn test_yuyv_short_buffer() {
        assert!(yuyv_to_rgb(&[0u8; 6], 2, 2).is_none());
        assert!(yuyv_to_rgb(&[0u8; 12], 3, 2).is_none());
    }

    #[cfg(not(all(target_os = "linux", feature = "v4l2")))]
    #[test]
    fn test_open_device_unsupported() {
        assert!(matches!(open_device(0), Err(SourceError::Unsupported(_))));
    }
}
