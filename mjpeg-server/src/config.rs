//! Server configuration.
//!
//! Runtime knobs ([`ServerConfig`]) use the same integer encoding on the
//! wire, in JSON settings files and on the command line: `-1` always means
//! "not regulated". The typed wrappers below reject values outside each
//! knob's domain so an invalid value can never reach the encoder or the
//! pacing logic.

use frame_source::FrameSize;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Wire value meaning "unregulated" for every knob
pub const UNREGULATED: i64 = -1;

/// Default cycle period when neither a settle nor a target rate is known
pub const IDLE_PERIOD: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: i64,
    },
    #[error("{field} is not an integer: {value:?}")]
    NotANumber { field: &'static str, value: String },
    #[error("resolution must be WIDTHxHEIGHT with sides 1-8192, or -1x-1, got {0:?}")]
    InvalidResolution(String),
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn parse_wire_int(field: &'static str, s: &str) -> Result<i64, ConfigError> {
    s.trim().parse::<i64>().map_err(|_| ConfigError::NotANumber {
        field,
        value: s.trim().to_string(),
    })
}

/// JPEG quality: `-1` for the encoder default, otherwise 0-100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "i64")]
pub enum Quality {
    #[default]
    Default,
    Level(u8),
}

impl TryFrom<i64> for Quality {
    type Error = ConfigError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            UNREGULATED => Ok(Quality::Default),
            0..=100 => Ok(Quality::Level(value as u8)),
            _ => Err(ConfigError::OutOfRange {
                field: "quality",
                expected: "-1 or 0-100",
                value,
            }),
        }
    }
}

impl From<Quality> for i64 {
    fn from(quality: Quality) -> Self {
        match quality {
            Quality::Default => UNREGULATED,
            Quality::Level(q) => q as i64,
        }
    }
}

impl FromStr for Quality {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_wire_int("quality", s)?.try_into()
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", i64::from(*self))
    }
}

/// A frame rate: `-1` when unset, otherwise at least 1 fps.
///
/// As a stream target, `Unset` means unthrottled. As a settle rate, it means
/// the source did not report one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "i64")]
pub enum FrameRate {
    #[default]
    Unset,
    Fps(u32),
}

impl FrameRate {
    /// Time between frames at this rate
    pub fn period(&self) -> Option<Duration> {
        match self {
            FrameRate::Unset => None,
            FrameRate::Fps(fps) => Some(Duration::from_secs(1) / *fps),
        }
    }
}

impl TryFrom<i64> for FrameRate {
    type Error = ConfigError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            UNREGULATED => Ok(FrameRate::Unset),
            1..=0xFFFF_FFFF => Ok(FrameRate::Fps(value as u32)),
            _ => Err(ConfigError::OutOfRange {
                field: "fps",
                expected: "-1 or a positive rate",
                value,
            }),
        }
    }
}

impl From<FrameRate> for i64 {
    fn from(rate: FrameRate) -> Self {
        match rate {
            FrameRate::Unset => UNREGULATED,
            FrameRate::Fps(fps) => fps as i64,
        }
    }
}

impl FromStr for FrameRate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_wire_int("fps", s)?.try_into()
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", i64::from(*self))
    }
}

/// Limit on concurrently counted connections: `-1` for unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "i64")]
pub enum ConnectionLimit {
    #[default]
    Unlimited,
    Max(u32),
}

impl ConnectionLimit {
    /// True if `active` connections leave no room for another
    pub fn is_reached(&self, active: usize) -> bool {
        match self {
            ConnectionLimit::Unlimited => false,
            ConnectionLimit::Max(max) => active >= *max as usize,
        }
    }
}

impl TryFrom<i64> for ConnectionLimit {
    type Error = ConfigError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            UNREGULATED => Ok(ConnectionLimit::Unlimited),
            1..=0xFFFF_FFFF => Ok(ConnectionLimit::Max(value as u32)),
            _ => Err(ConfigError::OutOfRange {
                field: "max connections",
                expected: "-1 or a positive count",
                value,
            }),
        }
    }
}

impl From<ConnectionLimit> for i64 {
    fn from(limit: ConnectionLimit) -> Self {
        match limit {
            ConnectionLimit::Unlimited => UNREGULATED,
            ConnectionLimit::Max(max) => max as i64,
        }
    }
}

impl FromStr for ConnectionLimit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_wire_int("max connections", s)?.try_into()
    }
}

impl fmt::Display for ConnectionLimit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", i64::from(*self))
    }
}

/// Largest accepted output width or height
pub const MAX_RESOLUTION_SIDE: u32 = 8192;

/// Output resolution: `-1x-1` keeps the source size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Resolution {
    #[default]
    Native,
    Scaled(FrameSize),
}

fn side_in_range(side: i64) -> bool {
    (1..=MAX_RESOLUTION_SIDE as i64).contains(&side)
}

impl FromStr for Resolution {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ConfigError::InvalidResolution(s.trim().to_string());
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(err)?;
        let w: i64 = w.trim().parse().map_err(|_| err())?;
        let h: i64 = h.trim().parse().map_err(|_| err())?;
        match (w, h) {
            (UNREGULATED, UNREGULATED) => Ok(Resolution::Native),
            (w, h) if side_in_range(w) && side_in_range(h) => {
                Ok(Resolution::Scaled(FrameSize::from_width_height(
                    w as u32, h as u32,
                )))
            }
            _ => Err(err()),
        }
    }
}

impl TryFrom<String> for Resolution {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Resolution::Native => write!(f, "-1x-1"),
            Resolution::Scaled(size) => write!(f, "{size}"),
        }
    }
}

/// Knobs tunable at runtime through the control endpoints.
///
/// Each field is independent: changing one never invalidates another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub quality: Quality,
    /// Rate streams are paced to
    pub target_fps: FrameRate,
    /// Native pull rate of the source
    pub settle_fps: FrameRate,
    pub resolution: Resolution,
    pub max_connections: ConnectionLimit,
}

impl ServerConfig {
    /// Target period of one acquisition cycle.
    ///
    /// Prefers the settle rate, then the stream target, then an idle poll.
    pub fn acquisition_period(&self) -> Duration {
        self.settle_fps
            .period()
            .or_else(|| self.target_fps.period())
            .unwrap_or(IDLE_PERIOD)
    }
}

/// Startup settings: where to listen plus the initial [`ServerConfig`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Display name used in the viewer page and error pages
    pub name: String,
    pub bind: IpAddr,
    pub port: u16,
    /// Failed part writes tolerated before a stream is dropped
    pub max_failed_writes: u32,
    /// Start acquisition at launch instead of on the first stream request
    pub eager_acquisition: bool,
    #[serde(flatten)]
    pub stream: ServerConfig,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            name: "MJPEG Server".to_string(),
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            max_failed_writes: 30,
            eager_acquisition: false,
            stream: ServerConfig::default(),
        }
    }
}

impl ServerSettings {
    /// Load settings from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}
