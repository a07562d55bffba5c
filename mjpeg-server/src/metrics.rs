//! Observed frame rate tracking for acquisition and streaming.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Minimum parts per stream fps sample
pub const STREAM_SAMPLE_FRAMES: u32 = 50;
/// Minimum duration of a stream fps sample
pub const STREAM_SAMPLE_WINDOW: Duration = Duration::from_millis(250);

/// Counts events over a sampling window and yields a rate once the window
/// has seen enough of them.
#[derive(Debug)]
pub struct FpsMeter {
    min_frames: u32,
    min_window: Duration,
    window_start: Instant,
    frames: u32,
}

impl FpsMeter {
    pub fn new(min_frames: u32, min_window: Duration) -> Self {
        Self::starting_at(min_frames, min_window, Instant::now())
    }

    pub fn starting_at(min_frames: u32, min_window: Duration, start: Instant) -> Self {
        Self {
            min_frames,
            min_window,
            window_start: start,
            frames: 0,
        }
    }

    /// Record one event at `now`.
    ///
    /// Returns the observed rate when both the frame count and the window
    /// length have been exceeded, then starts a new window.
    pub fn tick(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if self.frames <= self.min_frames || elapsed <= self.min_window {
            return None;
        }
        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.window_start = now;
        Some(fps)
    }
}

/// f32 stored as raw bits so it can sit in an atomic
#[derive(Debug, Default)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Server-wide counters, updated lock-free by the acquisition loop and
/// stream sessions.
#[derive(Debug, Default)]
pub struct Metrics {
    capture_fps: AtomicF32,
    stream_fps: AtomicF32,
    frames_published: AtomicU64,
    source_errors: AtomicU64,
}

impl Metrics {
    pub fn record_capture_fps(&self, fps: f32) {
        self.capture_fps.store(fps);
    }

    pub fn record_stream_fps(&self, fps: f32) {
        self.stream_fps.store(fps);
    }

    pub fn record_published(&self) {
        self.frames_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_error(&self) {
        self.source_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            capture_fps: self.capture_fps.load(),
            stream_fps: self.stream_fps.load(),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            source_errors: self.source_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    /// Observed acquisition rate, 0 until the first sample
    pub capture_fps: f32,
    /// Most recent rate observed by any stream session
    pub stream_fps: f32,
    pub frames_published: u64,
    pub source_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_meter_needs_frames_and_window() {
        let start = Instant::now();
        let mut meter = FpsMeter::starting_at(5, Duration::from_millis(100), start);

        // Enough time but too few frames
        for i in 1..=5 {
            assert!(meter
                .tick(start + Duration::from_millis(200 + i))
                .is_none());
        }
        let fps = meter.tick(start + Duration::from_millis(300)).unwrap();
        assert_relative_eq!(fps, 20.0, epsilon = 1e-3);
    }

    #[test]
    fn test_meter_resets_after_sample() {
        let start = Instant::now();
        let mut meter = FpsMeter::starting_at(2, Duration::from_millis(10), start);
        for i in 1..=2 {
            assert!(meter.tick(start + Duration::from_millis(i)).is_none());
        }
        // Frame count met but window not yet exceeded
        assert!(meter.tick(start + Duration::from_millis(5)).is_none());
        let fps = meter.tick(start + Duration::from_millis(40)).unwrap();
        assert_relative_eq!(fps, 100.0, epsilon = 1e-3);

        assert!(meter.tick(start + Duration::from_millis(80)).is_none());
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = Metrics::default();
        metrics.record_capture_fps(29.5);
        metrics.record_published();
        metrics.record_published();
        metrics.record_source_error();

        let snapshot = metrics.snapshot();
        assert_relative_eq!(snapshot.capture_fps, 29.5);
        assert_relative_eq!(snapshot.stream_fps, 0.0);
        assert_eq!(snapshot.frames_published, 2);
        assert_eq!(snapshot.source_errors, 1);
    }
}
