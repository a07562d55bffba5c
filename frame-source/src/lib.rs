//! Frame source adapters for the MJPEG server.
//!
//! A frame source is anything that can hand out the next raster image on
//! demand and be released when the process is done with it. The server core
//! never assumes a particular capture backend; it only talks to
//! [`FrameSource`].
//!
//! # Adapters
//! - [`device`] - V4L2 capture devices addressed by index (`v4l2` feature, Linux only)
//! - [`network`] - another HTTP server's MJPEG stream or single-JPEG endpoint
//! - [`test_pattern`] - synthetic moving gradient, no hardware needed

pub mod device;
pub mod frame;
mod multipart;
pub mod network;
pub mod test_pattern;

pub use frame::{Frame, FrameSize, FrameSizeParseError};
pub use network::NetworkStreamSource;
pub use test_pattern::TestPatternSource;

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for frame source operations
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be opened
    #[error("Failed to open source {identifier}: {reason}")]
    Open { identifier: String, reason: String },
    /// A frame pull failed
    #[error("Capture error: {0}")]
    Capture(String),
    /// Frame bytes could not be decoded into an image
    #[error("Decode error: {0}")]
    Decode(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// HTTP transport failure talking to a network source
    #[error("HTTP error: {0}")]
    Http(String),
    /// The source kind is not available in this build
    #[error("Unsupported source: {0}")]
    Unsupported(String),
    /// The source identifier could not be understood
    #[error("Invalid source identifier: {0}")]
    InvalidIdentifier(String),
    /// The source was released and can no longer produce frames
    #[error("Source has been released")]
    Released,
}

/// Result type for frame source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Capability to produce frames.
///
/// Implementations are pulled from a single acquisition thread at a time;
/// callers serialize access behind a lock.
pub trait FrameSource: Send {
    /// Pull the next frame.
    ///
    /// `Ok(None)` means no frame is available right now (the source is
    /// still warming up, or a network stream is between reconnects). The
    /// caller should simply try again on its next cycle.
    fn next_frame(&mut self) -> SourceResult<Option<Frame>>;

    /// Release the underlying device or connection.
    ///
    /// After release, `next_frame` returns [`SourceError::Released`].
    fn release(&mut self) -> SourceResult<()> {
        Ok(())
    }

    /// Native frame rate of the source, when the backend reports one
    fn native_fps(&self) -> Option<u32> {
        None
    }

    /// Human-readable identifier for logs
    fn name(&self) -> &str;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> SourceResult<Option<Frame>> {
        (**self).next_frame()
    }

    fn release(&mut self) -> SourceResult<()> {
        (**self).release()
    }

    fn native_fps(&self) -> Option<u32> {
        (**self).native_fps()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Identifier selecting which adapter to open.
///
/// Parsed from strings:
/// - `0`, `1`, ... - capture device index
/// - `http://...` / `https://...` - network stream URL
/// - `test` or `test:WIDTHxHEIGHT` - synthetic test pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Device(u32),
    Url(String),
    TestPattern(FrameSize),
}

impl SourceSpec {
    /// Default size for `test` without explicit dimensions
    pub const DEFAULT_TEST_SIZE: FrameSize = FrameSize {
        width: 640,
        height: 480,
    };
}

impl FromStr for SourceSpec {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(index) = s.parse::<u32>() {
            return Ok(SourceSpec::Device(index));
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(SourceSpec::Url(s.to_string()));
        }
        if s == "test" {
            return Ok(SourceSpec::TestPattern(Self::DEFAULT_TEST_SIZE));
        }
        if let Some(size) = s.strip_prefix("test:") {
            let size: FrameSize = size
                .parse()
                .map_err(|e: FrameSizeParseError| SourceError::InvalidIdentifier(e.to_string()))?;
            if size.is_empty() {
                return Err(SourceError::InvalidIdentifier(format!(
                    "test pattern size must be non-zero, got {size}"
                )));
            }
            return Ok(SourceSpec::TestPattern(size));
        }
        Err(SourceError::InvalidIdentifier(s.to_string()))
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SourceSpec::Device(index) => write!(f, "device {index}"),
            SourceSpec::Url(url) => write!(f, "{url}"),
            SourceSpec::TestPattern(size) => write!(f, "test:{size}"),
        }
    }
}

/// Open the adapter selected by `spec`.
pub fn open_source(spec: &SourceSpec) -> SourceResult<Box<dyn FrameSource>> {
    tracing::info!("Opening frame source {spec}");
    match spec {
        SourceSpec::Device(index) => device::open_device(*index),
        SourceSpec::Url(url) => Ok(Box::new(NetworkStreamSource::open(url)?)),
        SourceSpec::TestPattern(size) => Ok(Box::new(TestPatternSource::new(*size))),
    }
}
