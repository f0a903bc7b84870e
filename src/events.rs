//! Interrupt-driven edge queue for the tipping-bucket input.
//!
//! The reed switch's GPIO ISR records a raw edge timestamp per falling
//! edge; the main loop drains them and feeds the debouncer. Heavy rain
//! plus contact chatter can produce several edges between two loop ticks,
//! hence a queue rather than a single-slot latch.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────────┐
//! │ GPIO ISR    │────▶│  Edge Queue  │────▶│  Main Loop       │
//! │ (producer)  │     │  (lock-free) │     │  → debouncer     │
//! └─────────────┘     └──────────────┘     └──────────────────┘
//! ```
//!
//! Single producer (the ISR), single consumer (the loop); head/tail are
//! atomics, the slot array is plain memory guarded by the SPSC discipline.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Maximum pending raw edges. Power of 2 for cheap ring modulo; 64 edges
/// between two 100 ms ticks is beyond any physical bounce burst.
const EDGE_QUEUE_CAP: usize = 64;

static EDGE_HEAD: AtomicUsize = AtomicUsize::new(0);
static EDGE_TAIL: AtomicUsize = AtomicUsize::new(0);
/// Edges dropped because the queue was full (diagnostic only).
static EDGE_DROPPED: AtomicU32 = AtomicU32::new(0);
// SAFETY: EDGE_BUFFER is accessed exclusively through push_edge (ISR, one
// writer) and pop_edge (main loop, one reader). The acquire/release pairs
// on EDGE_HEAD/EDGE_TAIL order the plain slot writes.
static mut EDGE_BUFFER: [u64; EDGE_QUEUE_CAP] = [0; EDGE_QUEUE_CAP];

/// Push one raw edge timestamp (milliseconds since boot).
/// Safe to call from ISR context (lock-free).
/// Returns `false` if the queue is full (edge dropped and counted).
pub fn push_edge(uptime_ms: u64) -> bool {
    let head = EDGE_HEAD.load(Ordering::Relaxed);
    let tail = EDGE_TAIL.load(Ordering::Acquire);
    let next_head = (head + 1) % EDGE_QUEUE_CAP;

    if next_head == tail {
        EDGE_DROPPED.fetch_add(1, Ordering::Relaxed);
        return false;
    }

    // SAFETY: single producer; see EDGE_BUFFER.
    unsafe {
        EDGE_BUFFER[head] = uptime_ms;
    }

    EDGE_HEAD.store(next_head, Ordering::Release);
    true
}

/// Pop the oldest pending edge. Called from the main loop only.
pub fn pop_edge() -> Option<u64> {
    let tail = EDGE_TAIL.load(Ordering::Relaxed);
    let head = EDGE_HEAD.load(Ordering::Acquire);

    if tail == head {
        return None;
    }

    // SAFETY: single consumer; see EDGE_BUFFER.
    let stamp = unsafe { EDGE_BUFFER[tail] };
    EDGE_TAIL.store((tail + 1) % EDGE_QUEUE_CAP, Ordering::Release);
    Some(stamp)
}

/// Drain all pending edges into a callback, oldest first.
pub fn drain_edges(mut handler: impl FnMut(u64)) {
    while let Some(stamp) = pop_edge() {
        handler(stamp);
    }
}

/// Number of pending edges.
pub fn queue_len() -> usize {
    let head = EDGE_HEAD.load(Ordering::Relaxed);
    let tail = EDGE_TAIL.load(Ordering::Relaxed);
    (head + EDGE_QUEUE_CAP - tail) % EDGE_QUEUE_CAP
}

/// Edges lost to queue overflow since boot.
pub fn dropped_count() -> u32 {
    EDGE_DROPPED.load(Ordering::Relaxed)
}

/// Host-test support: clear the queue and the drop counter.
#[cfg(not(target_os = "espidf"))]
pub fn reset_for_test() {
    while pop_edge().is_some() {}
    EDGE_DROPPED.store(0, Ordering::Relaxed);
}
