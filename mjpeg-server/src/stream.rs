//! Multipart MJPEG streaming to one viewer.

use crate::acquisition;
use crate::config::FrameRate;
use crate::metrics::{FpsMeter, STREAM_SAMPLE_FRAMES, STREAM_SAMPLE_WINDOW};
use crate::pacing::{paced_delay, MIN_SLEEP};
use crate::response::{part_header, stream_header, ErrorPage};
use crate::state::StreamState;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

/// An unthrottled stream resends the current frame after this long without a
/// new one, so a vanished viewer is still noticed.
pub const IDLE_RESEND: Duration = Duration::from_secs(1);

/// Why a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The header could not be written or the payload channel closed
    Disconnected,
    /// More part writes failed than the configured limit
    TooManyFailures,
    /// The connection limit was reached
    Rejected,
}

async fn write_header<W: AsyncWrite + Unpin>(writer: &mut W) -> std::io::Result<()> {
    writer.write_all(&stream_header()).await?;
    writer.flush().await
}

async fn write_part<W: AsyncWrite + Unpin>(writer: &mut W, jpeg: &Bytes) -> std::io::Result<()> {
    writer.write_all(&part_header(jpeg.len())).await?;
    writer.write_all(jpeg).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await
}

/// Stream the current payload to `writer` until the viewer goes away.
///
/// Holds a counted connection slot for the whole stream and starts the
/// acquisition worker if nothing has yet.
pub async fn serve_stream<W: AsyncWrite + Unpin>(
    state: &Arc<StreamState>,
    writer: &mut W,
) -> StreamEnd {
    let Some(_slot) = state.try_acquire_slot() else {
        info!("Rejecting stream: connection limit reached");
        let page = ErrorPage::TooManyConnections
            .response(state.name())
            .closing();
        if let Err(e) = page.write_to(writer).await {
            debug!("Failed to send rejection: {e}");
        }
        return StreamEnd::Rejected;
    };

    acquisition::ensure_started(state);

    if let Err(e) = write_header(writer).await {
        debug!("Failed to start stream: {e}");
        return StreamEnd::Disconnected;
    }
    info!("Stream started ({} active)", state.connections());

    let mut rx = state.subscribe();
    let mut failures = 0u32;
    let mut last_sent = 0u64;
    let mut last_cycle = Instant::now();
    let mut meter = FpsMeter::new(STREAM_SAMPLE_FRAMES, STREAM_SAMPLE_WINDOW);

    loop {
        let target = state.config().target_fps;
        let payload = rx.borrow_and_update().clone();

        if !payload.is_ready() {
            if rx.changed().await.is_err() {
                return StreamEnd::Disconnected;
            }
            continue;
        }

        if target == FrameRate::Unset && payload.sequence == last_sent {
            match timeout(IDLE_RESEND, rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return StreamEnd::Disconnected,
                Err(_) => {}
            }
        }

        match write_part(writer, &payload.jpeg).await {
            Ok(()) => {
                last_sent = payload.sequence;
                if let Some(fps) = meter.tick(Instant::now()) {
                    debug!("Stream rate {fps:.1} fps");
                    state.counters().record_stream_fps(fps);
                }
            }
            Err(e) => {
                failures += 1;
                debug!("Part write failed ({failures}): {e}");
                if failures > state.max_failed_writes() {
                    info!("Ending stream after {failures} failed writes");
                    return StreamEnd::TooManyFailures;
                }
            }
        }

        let now = Instant::now();
        let delta = now.duration_since(last_cycle);
        last_cycle = now;
        let delay = target
            .period()
            .map_or(MIN_SLEEP, |period| paced_delay(period, delta, Duration::ZERO));
        sleep(delay).await;
    }
}
