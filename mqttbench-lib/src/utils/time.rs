use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Fractional milliseconds of a [`Duration`], without the rounding
/// error of going through `as_secs_f64`.
pub fn millis_f64(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.
}

/// Milliseconds since the unix epoch for the given point in time.
///
/// Points in time before the epoch resolve to `0`.
pub fn unix_millis(t: SystemTime) -> u128 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}

/// `count / elapsed` in events per second, `0` when no time elapsed.
pub fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0. { count as f64 / secs } else { 0. }
}
