//! Command-line arguments shared by server binaries.

use crate::config::{
    ConfigError, ConnectionLimit, FrameRate, Quality, Resolution, ServerSettings,
};
use clap::Args;
use frame_source::{FrameSize, SourceSpec};
use std::net::IpAddr;
use std::path::PathBuf;

/// Which frame source to serve.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    #[arg(
        short = 's',
        long,
        default_value = "0",
        help = "Frame source: device index or stream URL",
        long_help = "Where frames come from. A number selects a capture device by index \
            (/dev/videoN, requires the v4l2 feature). An http:// or https:// URL follows \
            another server's MJPEG stream or polls a single-JPEG endpoint. 'test' or \
            'test:WIDTHxHEIGHT' serves a synthetic test pattern."
    )]
    pub source: SourceSpec,

    #[arg(
        long,
        value_name = "WxH",
        conflicts_with = "source",
        help = "Serve a synthetic test pattern of this size",
        long_help = "Shorthand for --source test:WxH. Useful for trying the server \
            without a camera."
    )]
    pub test_pattern: Option<FrameSize>,
}

impl SourceArgs {
    pub fn spec(&self) -> SourceSpec {
        match self.test_pattern {
            Some(size) => SourceSpec::TestPattern(size),
            None => self.source.clone(),
        }
    }
}

/// Listener and stream tuning. Every flag overrides the settings file.
#[derive(Args, Debug, Clone, Default)]
pub struct ServerArgs {
    #[arg(
        short = 'c',
        long,
        help = "JSON settings file",
        long_help = "Load startup settings from a JSON file. Fields match the flag names in \
            snake_case (port, bind, name, quality, target_fps, settle_fps, resolution, \
            max_connections, max_failed_writes, eager_acquisition). Flags given on the \
            command line take precedence."
    )]
    pub config: Option<PathBuf>,

    #[arg(short = 'p', long, help = "HTTP server port [default: 8080]")]
    pub port: Option<u16>,

    #[arg(
        short = 'b',
        long,
        help = "HTTP server bind address [default: 0.0.0.0]",
        long_help = "IP address to bind the HTTP server to. Use '0.0.0.0' to listen on all \
            interfaces, or '127.0.0.1' for localhost-only access."
    )]
    pub bind: Option<IpAddr>,

    #[arg(
        short = 'n',
        long,
        help = "Display name for the viewer page and error pages"
    )]
    pub name: Option<String>,

    #[arg(
        short = 'q',
        long,
        allow_hyphen_values = true,
        help = "JPEG quality, 0-100 or -1 for the encoder default"
    )]
    pub quality: Option<Quality>,

    #[arg(
        short = 'f',
        long,
        allow_hyphen_values = true,
        help = "Stream frame rate, -1 for unthrottled",
        long_help = "Rate each viewer's stream is paced to. With -1 every viewer receives each \
            new frame as soon as it is encoded. Adjustable at runtime via POST /fps."
    )]
    pub fps: Option<FrameRate>,

    #[arg(
        long,
        allow_hyphen_values = true,
        help = "Source pull rate, -1 to use the source's native rate",
        long_help = "Rate the acquisition thread pulls frames at. Defaults to the rate the \
            source reports; when neither is known, the stream frame rate is used, and \
            failing that one frame per second."
    )]
    pub settle_fps: Option<FrameRate>,

    #[arg(
        short = 'r',
        long,
        value_name = "WxH",
        allow_hyphen_values = true,
        help = "Output resolution, -1x-1 to keep the source size"
    )]
    pub resolution: Option<Resolution>,

    #[arg(
        short = 'm',
        long,
        allow_hyphen_values = true,
        help = "Maximum concurrent viewers, -1 for unlimited"
    )]
    pub max_connections: Option<ConnectionLimit>,

    #[arg(
        long,
        help = "Failed part writes tolerated before a stream is dropped [default: 30]"
    )]
    pub max_failed_writes: Option<u32>,

    #[arg(
        long,
        help = "Start acquiring frames at launch instead of on the first stream request"
    )]
    pub eager: bool,
}

impl ServerArgs {
    /// Resolve settings: file first, then flags on top.
    pub fn settings(&self) -> Result<ServerSettings, ConfigError> {
        let mut settings = match &self.config {
            Some(path) => ServerSettings::load(path)?,
            None => ServerSettings::default(),
        };

        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(bind) = self.bind {
            settings.bind = bind;
        }
        if let Some(name) = &self.name {
            settings.name = name.clone();
        }
        if let Some(quality) = self.quality {
            settings.stream.quality = quality;
        }
        if let Some(fps) = self.fps {
            settings.stream.target_fps = fps;
        }
        if let Some(settle) = self.settle_fps {
            settings.stream.settle_fps = settle;
        }
        if let Some(resolution) = self.resolution {
            settings.stream.resolution = resolution;
        }
        if let Some(limit) = self.max_connections {
            settings.stream.max_connections = limit;
        }
        if let Some(max) = self.max_failed_writes {
            settings.max_failed_writes = max;
        }
        settings.eager_acquisition |= self.eager;

        Ok(settings)
    }
}
