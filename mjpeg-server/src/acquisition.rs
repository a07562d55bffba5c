//! Background frame acquisition.
//!
//! One worker thread per process pulls frames from the source, encodes them
//! with the current settings and publishes the result for every stream. It
//! is started by the first stream request, or at launch when configured.
//! The worker holds only a weak reference to the shared state and exits once
//! the state is dropped or the source has been released.

use crate::error::CaptureError;
use crate::metrics::FpsMeter;
use crate::pacing::paced_delay;
use crate::state::StreamState;
use frame_source::SourceError;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Pulls discarded before the first publish
pub const WARMUP_FRAMES: usize = 3;
pub const WARMUP_INTERVAL: Duration = Duration::from_millis(50);

/// Taken off every acquisition sleep to leave time for the pull itself
const ACQUISITION_LEAD: Duration = Duration::from_millis(3);

const CAPTURE_SAMPLE_FRAMES: u32 = 30;
const CAPTURE_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// Start the acquisition worker unless it is already running.
///
/// Returns true if this call started it.
pub fn ensure_started(state: &Arc<StreamState>) -> bool {
    if !state.claim_acquisition() {
        return false;
    }

    let weak = Arc::downgrade(state);
    let spawned = thread::Builder::new()
        .name("acquisition".to_string())
        .spawn(move || run(weak));

    match spawned {
        Ok(_) => {
            info!("Started frame acquisition");
            true
        }
        Err(e) => {
            error!("Failed to spawn acquisition thread: {e}");
            state.abandon_acquisition();
            false
        }
    }
}

fn warm_up(state: &StreamState) {
    for i in 0..WARMUP_FRAMES {
        if let Err(e) = state.discard_frame() {
            debug!("Warm-up pull {i} failed: {e}");
        }
        thread::sleep(WARMUP_INTERVAL);
    }
}

fn run(weak: Weak<StreamState>) {
    match weak.upgrade() {
        Some(state) => warm_up(&state),
        None => return,
    }

    let mut meter = FpsMeter::new(CAPTURE_SAMPLE_FRAMES, CAPTURE_SAMPLE_WINDOW);
    let mut last_cycle = Instant::now();

    loop {
        let Some(period) = weak.upgrade().map(|s| s.config().acquisition_period()) else {
            break;
        };
        let now = Instant::now();
        let delta = now.duration_since(last_cycle);
        last_cycle = now;
        thread::sleep(paced_delay(period, delta, ACQUISITION_LEAD));

        let Some(state) = weak.upgrade() else {
            break;
        };
        match state.capture_and_encode() {
            Ok(encoded) => {
                state.publish(encoded);
                if let Some(fps) = meter.tick(Instant::now()) {
                    debug!("Capture rate {fps:.1} fps");
                    state.counters().record_capture_fps(fps);
                }
            }
            Err(CaptureError::Source(SourceError::Released)) => {
                info!("Frame source released, stopping acquisition");
                break;
            }
            Err(CaptureError::Unavailable) => debug!("No frame this cycle"),
            Err(e) => {
                warn!("Skipping acquisition cycle: {e}");
                state.counters().record_source_error();
            }
        }
    }
}
