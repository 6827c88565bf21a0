// Millisecond-resolution timestamps for logging and idle-timeout tracking.
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall clock time in milliseconds, used to prefix log lines and
/// to measure idle-timer dwell time between frames.
pub fn get_current_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
