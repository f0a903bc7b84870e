//! Reed-switch debouncer for the tipping-bucket impulse input.
//!
//! The bucket's magnet sweeps past a reed switch, which chatters for a few
//! milliseconds around each physical tip. The ISR records every raw edge
//! (see [`crate::events`]); this state machine accepts at most one
//! [`ImpulseEvent`] per debounce window and silently counts the suppressed
//! chatter — bounce is expected behaviour, not an error.

use super::ImpulseEvent;

/// Default minimum interval between accepted tips. A tipping bucket cannot
/// physically cycle faster than a few hundred milliseconds even in
/// cloudburst rain.
pub const DEFAULT_DEBOUNCE_MS: u32 = 200;

pub struct ImpulseDebouncer {
    window_ms: u32,
    last_accepted_ms: Option<u64>,
    seq: u32,
    suppressed: u32,
}

impl ImpulseDebouncer {
    pub fn new(window_ms: u32) -> Self {
        Self {
            window_ms,
            last_accepted_ms: None,
            seq: 0,
            suppressed: 0,
        }
    }

    /// Offer one raw edge timestamp from the ISR queue.
    ///
    /// Returns a validated [`ImpulseEvent`] when the edge is at least the
    /// debounce window after the previously accepted tip, `None` when it is
    /// suppressed as bounce.
    pub fn offer(&mut self, edge_uptime_ms: u64) -> Option<ImpulseEvent> {
        if let Some(last) = self.last_accepted_ms {
            if edge_uptime_ms.saturating_sub(last) < u64::from(self.window_ms) {
                self.suppressed = self.suppressed.wrapping_add(1);
                return None;
            }
        }

        self.last_accepted_ms = Some(edge_uptime_ms);
        self.seq = self.seq.wrapping_add(1);
        Some(ImpulseEvent {
            seq: self.seq,
            uptime_ms: edge_uptime_ms,
        })
    }

    /// Total tips accepted since boot.
    pub fn accepted_count(&self) -> u32 {
        self.seq
    }

    /// Edges suppressed as bounce since boot (diagnostic only).
    pub fn suppressed_count(&self) -> u32 {
        self.suppressed
    }
}
