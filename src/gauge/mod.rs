//! Rain gauge domain — debounced impulse events and hourly accumulation.
//!
//! A tipping bucket emits one electrical pulse per fixed volume of collected
//! water. The [`debounce`] module turns noisy edge bursts into clean
//! [`ImpulseEvent`]s; the [`accumulator`] module buckets them into
//! DST-correct local-hour totals.

pub mod accumulator;
pub mod debounce;

/// One validated bucket tip.
///
/// Stamped with monotonic uptime so events created before the first NTP
/// sync are still ordered; the wall-clock assignment happens in the
/// accumulator once a clock is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImpulseEvent {
    /// Monotonically increasing tip number since boot.
    pub seq: u32,
    /// Milliseconds since boot at the validated edge.
    pub uptime_ms: u64,
}

/// Finalized impulse count for one local-time hour bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourlyTotal {
    /// UTC epoch seconds at which the local hour began.
    pub hour_start_epoch: i64,
    /// Impulses recorded within `[hour_start, hour_start + 1h)` local time.
    pub count: u32,
    /// True when the total was flushed before the hour completed.
    pub provisional: bool,
}
