//! Unified error types for the rain gauge firmware.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! main loop's handling uniform. Nothing here is fatal: every variant maps
//! to a local retry-with-backoff or graceful degradation, and the device
//! keeps attempting recovery indefinitely. All variants are `Copy` so they
//! pass through the loop without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Wall-clock time is unavailable or a sync attempt failed.
    Time(TimeError),
    /// The Wi-Fi link failed or was lost.
    Link(LinkError),
    /// The MQTT broker could not be reached or a publish failed.
    Broker(BrokerError),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
    /// Peripheral initialisation failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time(e) => write!(f, "time: {e}"),
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Broker(e) => write!(f, "broker: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Time errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeError {
    /// No successful NTP sync yet — consumers fall back to monotonic time.
    NotSet,
    /// Every configured NTP server timed out or answered garbage.
    SyncFailed,
}

impl fmt::Display for TimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSet => write!(f, "wall clock not set"),
            Self::SyncFailed => write!(f, "all NTP servers failed"),
        }
    }
}

impl From<TimeError> for Error {
    fn from(e: TimeError) -> Self {
        Self::Time(e)
    }
}

// ---------------------------------------------------------------------------
// Link errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// An association attempt failed outright.
    ConnectFailed,
    /// The association attempt exceeded the bounded connect timeout.
    Timeout,
    /// An established link dropped — the manager re-enters its retry cycle.
    LinkLost,
    /// No usable credential set is configured.
    NoCredentials,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed => write!(f, "connect failed"),
            Self::Timeout => write!(f, "connect timed out"),
            Self::LinkLost => write!(f, "link lost"),
            Self::NoCredentials => write!(f, "no credentials configured"),
        }
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// Broker errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    /// Session establishment failed; retried on the next cycle.
    Unreachable,
    /// A publish was not accepted within the operation timeout.
    PublishFailed,
    /// The live session dropped; queued messages for the current window
    /// fall under the bounded-queue drop policy.
    SessionLost,
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => write!(f, "broker unreachable"),
            Self::PublishFailed => write!(f, "publish failed"),
            Self::SessionLost => write!(f, "session lost"),
        }
    }
}

impl From<BrokerError> for Error {
    fn from(e: BrokerError) -> Self {
        Self::Broker(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
