use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time as unix nanoseconds, the unit every stored timestamp uses.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}
