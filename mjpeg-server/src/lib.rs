//! MJPEG fan-out server.
//!
//! Frames are pulled from one [`frame_source::FrameSource`] by a background
//! acquisition thread, encoded once, and broadcast to every viewer as a
//! `multipart/x-mixed-replace` stream. The HTTP layer is hand-rolled on
//! top of `tokio::net`.
//!
//! # Endpoints
//! - `/mjpg` - continuous MJPEG stream
//! - `/jpg` - one freshly captured JPEG
//! - `/` or `/html` - viewer page embedding the stream
//! - `/fps`, `/quality`, `/connections`, `/resolution` - GET to read, POST to set

pub mod acquisition;
pub mod args;
pub mod config;
pub mod control;
pub mod encode;
pub mod error;
pub mod http;
pub mod listener;
pub mod metrics;
pub mod pacing;
pub mod response;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod stream;

pub use config::{ServerConfig, ServerSettings};
pub use error::{CaptureError, ServerError};
pub use listener::MjpegServer;
pub use metrics::MetricsSnapshot;
pub use state::{StreamState, BOUNDARY};
