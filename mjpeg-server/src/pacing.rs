//! Frame pacing shared by the acquisition loop and stream sessions.

use std::time::Duration;

/// Shortest sleep between cycles, also used when a cycle is already late
pub const MIN_SLEEP: Duration = Duration::from_millis(2);

/// Delay before the next cycle.
///
/// `elapsed` is the time since the previous cycle point, sleep included.
/// The shortfall against `period` is doubled and `lead` taken off, so short
/// and long cycles alternate and average out to `period`.
pub fn paced_delay(period: Duration, elapsed: Duration, lead: Duration) -> Duration {
    if elapsed >= period {
        return MIN_SLEEP;
    }
    ((period - elapsed) * 2)
        .saturating_sub(lead)
        .max(MIN_SLEEP)
}
