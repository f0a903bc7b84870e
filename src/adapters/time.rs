//! Monotonic uptime source.
//!
//! Every timestamp inside the domain is uptime-relative; wall-clock time
//! is layered on top by [`ClockSync`](crate::timekeeping::ClockSync).
//! On target this reads the 64-bit system timer, which never wraps within
//! the lifetime of the hardware and is safe to read from ISRs.

pub struct MonotonicClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Milliseconds since boot.
    #[cfg(target_os = "espidf")]
    pub fn now_ms(&self) -> u64 {
        (unsafe { esp_idf_sys::esp_timer_get_time() } / 1000) as u64
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
