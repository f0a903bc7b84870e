//! Port traits — the hexagonal boundary between domain logic and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ AppService (domain)
//! ```
//!
//! Driven adapters (Wi-Fi, MQTT session, SNTP client, NVS storage, log
//! sink) implement these traits. The [`AppService`](super::service::AppService)
//! consumes them via generics, so the domain core never touches ESP-IDF
//! directly and every test can substitute a mock.

use crate::config::DeviceConfig;
use crate::gauge::{HourlyTotal, ImpulseEvent};

// ───────────────────────────────────────────────────────────────
// Connectivity port (driven adapter: Wi-Fi link → domain)
// ───────────────────────────────────────────────────────────────

/// Connection state of the Wi-Fi link, owned by the connectivity manager
/// and only read by everyone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Repeated failures exceeded the configured threshold; retries are
    /// pinned at the backoff cap until an attempt succeeds.
    Degraded,
}

/// The domain polls this each cycle; the adapter owns the underlying
/// network stack connection exclusively and drives its own retry policy.
pub trait ConnectivityPort {
    /// Current link state.
    fn state(&self) -> LinkState;

    /// Convenience readiness check.
    fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Advance the reconnection state machine and return the resulting
    /// state. Never blocks beyond the configured association timeout.
    fn poll(&mut self, now_ms: u64) -> LinkState;
}

// ───────────────────────────────────────────────────────────────
// Publisher port (driven adapter: domain → MQTT broker)
// ───────────────────────────────────────────────────────────────

/// Best-effort outbound telemetry. Enqueueing never fails and never
/// blocks; a full queue drops the oldest entry (bounded-memory policy).
pub trait PublisherPort {
    /// Queue a per-impulse message. `epoch` carries the wall-clock stamp
    /// when the clock is synced, `None` before first sync.
    fn publish_impulse(&mut self, event: &ImpulseEvent, epoch: Option<i64>);

    /// Queue an hourly-total message.
    fn publish_hourly(&mut self, total: &HourlyTotal);

    /// Drive session establishment and queue drainage. Only attempts the
    /// broker while `link_up`; bounded by the operation timeout.
    fn poll(&mut self, link_up: bool, now_ms: u64);

    /// Messages dropped since boot (queue overflow + staleness policy).
    fn dropped_count(&self) -> u32;
}

// ───────────────────────────────────────────────────────────────
// SNTP port (driven adapter: domain → NTP servers)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SntpError {
    /// No reply within the per-server timeout.
    Timeout,
    /// DNS or socket failure before a query went out.
    Unreachable,
    /// A reply arrived but failed sanity checks (era, stratum, KoD).
    BadReply,
}

impl core::fmt::Display for SntpError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Timeout => write!(f, "query timed out"),
            Self::Unreachable => write!(f, "server unreachable"),
            Self::BadReply => write!(f, "reply failed sanity checks"),
        }
    }
}

/// One blocking-with-timeout time query against a single server.
/// [`ClockSync`](crate::timekeeping::ClockSync) owns the ordered fallback
/// across the configured server list.
pub trait SntpPort {
    /// Query `server` and return UTC epoch seconds.
    fn query(&mut self, server: &str, timeout_ms: u32) -> Result<i64, SntpError>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port. Adapters decide where they go (serial log, test
/// capture buffer, …).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored blob failed integrity / deserialization checks.
    Corrupted,
    /// A field failed range validation; the message names the field.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

/// Loads and persists the device configuration.
///
/// Implementations MUST validate before persisting — a corrupted or
/// injected blob must not be able to zero the debounce window or blank the
/// broker address. Invalid values are rejected with
/// [`ConfigError::ValidationFailed`], never silently clamped.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`ConfigError::NotFound`] on first boot.
    fn load(&self) -> Result<DeviceConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&mut self, config: &DeviceConfig) -> Result<(), ConfigError>;
}
