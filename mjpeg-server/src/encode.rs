//! Frame resizing and JPEG compression.

use crate::config::{Quality, Resolution};
use bytes::Bytes;
use frame_source::{Frame, FrameSize};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("frame is empty")]
    EmptyFrame,
    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// One compressed frame
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub jpeg: Bytes,
    pub size: FrameSize,
}

/// Resize `frame` to `resolution` if one is set, then compress it.
///
/// Grayscale frames are encoded as single-channel JPEG; every other pixel
/// layout is converted to RGB first.
pub fn encode_frame(
    frame: &Frame,
    quality: Quality,
    resolution: Resolution,
) -> Result<EncodedFrame, EncodeError> {
    if frame.is_empty() {
        return Err(EncodeError::EmptyFrame);
    }

    let resized;
    let image = match resolution {
        Resolution::Scaled(size) if size != frame.size() => {
            resized = frame
                .image()
                .resize_exact(size.width, size.height, FilterType::Triangle);
            &resized
        }
        _ => frame.image(),
    };
    let size = FrameSize::from_width_height(image.width(), image.height());

    let mut jpeg = Vec::new();
    {
        let mut encoder = match quality {
            Quality::Default => JpegEncoder::new(&mut jpeg),
            Quality::Level(q) => JpegEncoder::new_with_quality(&mut jpeg, q),
        };
        match image {
            DynamicImage::ImageLuma8(gray) => encoder.encode_image(gray)?,
            other => encoder.encode_image(&other.to_rgb8())?,
        }
    }

    Ok(EncodedFrame {
        jpeg: Bytes::from(jpeg),
        size,
    })
}
