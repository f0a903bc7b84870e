//! Outbound application events.
//!
//! The [`AppService`](super::service::AppService) emits these through the
//! [`EventSink`](super::ports::EventSink) port. Adapters on the other side
//! decide what to do with them — log to serial, capture in a test buffer,
//! etc. MQTT publication is *not* routed through here; impulse and hourly
//! messages go straight to the [`PublisherPort`](super::ports::PublisherPort)
//! so their ordering guarantee is independent of observability wiring.

use crate::app::ports::LinkState;
use crate::gauge::{HourlyTotal, ImpulseEvent};

/// Structured events emitted by the application core.
#[derive(Debug, Clone, Copy)]
pub enum AppEvent {
    /// The service has started.
    Started,

    /// A debounced bucket tip was accepted.
    TipDetected(ImpulseEvent),

    /// An hour bucket was finalized at rollover (or flushed).
    HourlyFinalized(HourlyTotal),

    /// The Wi-Fi link manager changed state.
    LinkChanged { from: LinkState, to: LinkState },

    /// The wall clock (re)synchronized. `resync` is false for the first
    /// successful sync after boot.
    ClockSynced { epoch: i64, resync: bool },

    /// A full pass over the NTP server list failed; sync will be retried.
    ClockSyncFailed,

    /// The publisher dropped queued messages (overflow or staleness).
    /// Carries the cumulative drop counter.
    PublishDropped { total: u32 },
}
