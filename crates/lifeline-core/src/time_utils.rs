use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

pub fn current_unix_timestamp() -> u64 {
    since_epoch().as_secs()
}

pub fn current_unix_timestamp_ms() -> u64 {
    u64::try_from(since_epoch().as_millis()).unwrap_or(u64::MAX)
}

/// Zero when the wall clock moved backwards.
pub fn elapsed_since_ms(started_unix_ms: u64) -> u64 {
    current_unix_timestamp_ms().saturating_sub(started_unix_ms)
}
