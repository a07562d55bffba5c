//! State shared by the acquisition loop and every connection.
//!
//! Each field group has its own synchronization: configuration sits behind
//! a reader-writer lock, the current JPEG is published through a watch
//! channel of immutable [`Bytes`], and the connection counter is a plain
//! atomic with a compare-and-swap admission step.

use crate::config::{FrameRate, ServerConfig, ServerSettings};
use crate::encode::{encode_frame, EncodedFrame};
use crate::error::CaptureError;
use crate::metrics::{Metrics, MetricsSnapshot};
use bytes::Bytes;
use frame_source::{FrameSize, FrameSource, SourceResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::watch;
use tracing::{info, warn};

/// Multipart boundary token used by every stream
pub const BOUNDARY: &str = "mjpgserverboundary";

/// Payloads shorter than this are treated as "not ready"
pub const MIN_JPEG_LEN: usize = 4;

/// The most recent encoded frame.
#[derive(Debug, Clone, Default)]
pub struct EncodedPayload {
    pub jpeg: Bytes,
    pub size: FrameSize,
    /// Incremented on every publish, 0 before the first one
    pub sequence: u64,
}

impl EncodedPayload {
    /// True once the payload holds something worth sending
    pub fn is_ready(&self) -> bool {
        self.jpeg.len() >= MIN_JPEG_LEN
    }
}

/// State shared by the acquisition worker and every connection.
///
/// Holds the runtime configuration, the latest encoded payload, the
/// connection counters and the frame source itself.
pub struct StreamState {
    name: String,
    max_failed_writes: u32,
    config: RwLock<ServerConfig>,
    payload: watch::Sender<EncodedPayload>,
    connections: AtomicUsize,
    snapshots: AtomicUsize,
    acquisition_started: AtomicBool,
    source: Mutex<Box<dyn FrameSource>>,
    released: AtomicBool,
    metrics: Metrics,
}

impl StreamState {
    /// Build shared state around an opened source.
    ///
    /// When no settle rate is configured, the source's native rate is used.
    pub fn new(settings: &ServerSettings, source: Box<dyn FrameSource>) -> Arc<Self> {
        let mut config = settings.stream;
        if config.settle_fps == FrameRate::Unset {
            if let Some(rate) = source
                .native_fps()
                .and_then(|fps| FrameRate::try_from(fps as i64).ok())
            {
                info!("Using native source rate {rate} fps as settle rate");
                config.settle_fps = rate;
            }
        }

        let (payload, _) = watch::channel(EncodedPayload::default());
        Arc::new(Self {
            name: settings.name.clone(),
            max_failed_writes: settings.max_failed_writes,
            config: RwLock::new(config),
            payload,
            connections: AtomicUsize::new(0),
            snapshots: AtomicUsize::new(0),
            acquisition_started: AtomicBool::new(false),
            source: Mutex::new(source),
            released: AtomicBool::new(false),
            metrics: Metrics::default(),
        })
    }

    /// Display name used in pages and error messages
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Failed part writes a stream tolerates before it is dropped
    pub fn max_failed_writes(&self) -> u32 {
        self.max_failed_writes
    }

    /// Copy of the current configuration
    pub fn config(&self) -> ServerConfig {
        *self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `update` to the configuration under the write lock.
    ///
    /// Running streams and the acquisition worker pick the change up on
    /// their next cycle.
    pub fn update_config(&self, update: impl FnOnce(&mut ServerConfig)) {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut config);
    }

    /// Receiver that sees every publish from now on
    pub fn subscribe(&self) -> watch::Receiver<EncodedPayload> {
        self.payload.subscribe()
    }

    /// Size of the last published frame, `0x0` before the first one
    pub fn last_frame_size(&self) -> FrameSize {
        self.payload.borrow().size
    }

    /// Replace the current payload and wake every waiting stream.
    pub fn publish(&self, encoded: EncodedFrame) {
        self.payload.send_modify(|payload| {
            payload.jpeg = encoded.jpeg;
            payload.size = encoded.size;
            payload.sequence += 1;
        });
        self.metrics.record_published();
    }

    /// Admit one more counted connection unless the limit is reached.
    pub fn try_acquire_slot(&self) -> Option<ConnectionSlot<'_>> {
        let limit = self.config().max_connections;
        self.connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (!limit.is_reached(active)).then_some(active + 1)
            })
            .ok()
            .map(|_| ConnectionSlot {
                counter: &self.connections,
            })
    }

    /// Count a single-image request in flight.
    ///
    /// Tracked apart from stream connections: it is never limited and never
    /// consulted by admission.
    pub fn track_snapshot(&self) -> ConnectionSlot<'_> {
        self.snapshots.fetch_add(1, Ordering::AcqRel);
        ConnectionSlot {
            counter: &self.snapshots,
        }
    }

    /// Number of single-image requests currently being served
    pub fn snapshots_in_flight(&self) -> usize {
        self.snapshots.load(Ordering::Acquire)
    }

    /// True when the connection limit leaves no free slot
    pub fn at_capacity(&self) -> bool {
        self.config().max_connections.is_reached(self.connections())
    }

    /// Number of connections currently holding a slot
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    /// Mark acquisition as started. Returns true for the first caller only.
    pub(crate) fn claim_acquisition(&self) -> bool {
        self.acquisition_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Undo [`Self::claim_acquisition`] when the worker could not start
    pub(crate) fn abandon_acquisition(&self) {
        self.acquisition_started.store(false, Ordering::Release);
    }

    /// Whether the acquisition worker has been started
    pub fn acquisition_started(&self) -> bool {
        self.acquisition_started.load(Ordering::Acquire)
    }

    /// Pull one frame and throw it away
    pub(crate) fn discard_frame(&self) -> SourceResult<()> {
        let mut source = self.source.lock().unwrap_or_else(PoisonError::into_inner);
        source.next_frame().map(|_| ())
    }

    /// Pull one frame and encode it with the current settings.
    ///
    /// Blocks on source I/O; only the pull itself holds the source lock.
    pub fn capture_and_encode(&self) -> Result<EncodedFrame, CaptureError> {
        let frame = {
            let mut source = self.source.lock().unwrap_or_else(PoisonError::into_inner);
            source.next_frame()?
        };
        let frame = frame
            .filter(|frame| !frame.is_empty())
            .ok_or(CaptureError::Unavailable)?;
        let config = self.config();
        Ok(encode_frame(&frame, config.quality, config.resolution)?)
    }

    /// Release the frame source. Later calls are no-ops.
    pub fn release_source(&self) -> SourceResult<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut source = self.source.lock().unwrap_or_else(PoisonError::into_inner);
        info!("Releasing frame source {}", source.name());
        source.release()
    }

    /// Point-in-time copy of the server counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub(crate) fn counters(&self) -> &Metrics {
        &self.metrics
    }
}

impl Drop for StreamState {
    fn drop(&mut self) {
        if let Err(e) = self.release_source() {
            warn!("Failed to release frame source: {e}");
        }
    }
}

/// A counted connection. The counter is decremented when this is dropped.
#[must_use]
pub struct ConnectionSlot<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for ConnectionSlot<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
