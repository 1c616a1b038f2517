use chrono::NaiveDateTime;

/// Monotonic and wall-clock time as seen by the tick loop
pub trait Clock {
    /// Milliseconds since boot
    fn now_ms(&self) -> u64;

    /// Local wall-clock time, `None` until NTP has synchronised
    fn local_time(&self) -> Option<NaiveDateTime>;

    /// Bounded busy-wait; blocks the whole loop for `ms`
    fn delay_ms(&self, ms: u32);
}
