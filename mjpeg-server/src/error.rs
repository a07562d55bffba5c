use crate::encode::EncodeError;
use frame_source::SourceError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors that stop the server itself
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to produce one encoded frame from the source
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// The source had no frame ready
    #[error("no frame available from source")]
    Unavailable,
}
