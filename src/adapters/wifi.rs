//! Wi-Fi station adapter with credential fallback and backed-off retry.
//!
//! State machine:
//!
//! ```text
//!             attempt due          join + DHCP ok
//! Disconnected ─────────> Connecting ─────────> Connected
//!      ^                      │                     │
//!      │   failure/timeout    │                     │ link lost
//!      ├──────────────────────┘                     │
//!      │<───────────────────────────────────────────┘
//!      │
//!      └──> Degraded  (after too many consecutive failures;
//!                      keeps retrying at the backoff cap)
//! ```
//!
//! Every failed attempt swaps to the other credential set (when a
//! usable secondary is configured) and doubles the retry delay up to
//! the configured cap. A successful association resets both.

use log::{info, warn};

use crate::app::ports::{ConnectivityPort, LinkState};
use crate::config::{DeviceConfig, WifiCredentials};
use crate::error::LinkError;

#[cfg(target_os = "espidf")]
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};

pub struct ConnectivityManager {
    state: LinkState,
    creds: [WifiCredentials; 2],
    active_slot: usize,
    backoff_initial_ms: u64,
    backoff_cap_ms: u64,
    backoff_ms: u64,
    connect_timeout_ms: u64,
    degraded_threshold: u8,
    consecutive_failures: u8,
    next_attempt_ms: u64,

    #[cfg(target_os = "espidf")]
    wifi: BlockingWifi<EspWifi<'static>>,
    #[cfg(not(target_os = "espidf"))]
    sim: SimPlatform,
}

impl ConnectivityManager {
    #[cfg(target_os = "espidf")]
    pub fn new(config: &DeviceConfig, wifi: BlockingWifi<EspWifi<'static>>) -> Self {
        Self::build(config, wifi)
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new(config: &DeviceConfig) -> Self {
        Self::build(config, SimPlatform::default())
    }

    #[cfg(target_os = "espidf")]
    fn build(config: &DeviceConfig, wifi: BlockingWifi<EspWifi<'static>>) -> Self {
        Self {
            state: LinkState::Disconnected,
            creds: [config.wifi_primary.clone(), config.wifi_secondary.clone()],
            active_slot: 0,
            backoff_initial_ms: config.backoff_initial_secs as u64 * 1000,
            backoff_cap_ms: config.backoff_cap_secs as u64 * 1000,
            backoff_ms: config.backoff_initial_secs as u64 * 1000,
            connect_timeout_ms: config.wifi_connect_timeout_secs as u64 * 1000,
            degraded_threshold: config.degraded_threshold,
            consecutive_failures: 0,
            next_attempt_ms: 0,
            wifi,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn build(config: &DeviceConfig, sim: SimPlatform) -> Self {
        Self {
            state: LinkState::Disconnected,
            creds: [config.wifi_primary.clone(), config.wifi_secondary.clone()],
            active_slot: 0,
            backoff_initial_ms: config.backoff_initial_secs as u64 * 1000,
            backoff_cap_ms: config.backoff_cap_secs as u64 * 1000,
            backoff_ms: config.backoff_initial_secs as u64 * 1000,
            connect_timeout_ms: config.wifi_connect_timeout_secs as u64 * 1000,
            degraded_threshold: config.degraded_threshold,
            consecutive_failures: 0,
            next_attempt_ms: 0,
            sim,
        }
    }

    /// SSID of the credential set the next attempt will use.
    pub fn active_ssid(&self) -> &str {
        self.creds[self.active_slot].ssid.as_str()
    }

    pub fn consecutive_failures(&self) -> u8 {
        self.consecutive_failures
    }

    /// Milliseconds until the next connect attempt fires, from `now_ms`.
    pub fn retry_in_ms(&self, now_ms: u64) -> u64 {
        self.next_attempt_ms.saturating_sub(now_ms)
    }

    fn record_success(&mut self) {
        self.state = LinkState::Connected;
        self.consecutive_failures = 0;
        self.backoff_ms = self.backoff_initial_ms;
        info!(
            "wifi: connected via '{}' (slot {})",
            self.creds[self.active_slot].ssid, self.active_slot
        );
    }

    fn record_failure(&mut self, now_ms: u64, err: LinkError) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        warn!(
            "wifi: attempt on '{}' failed ({}), {} consecutive failures",
            self.creds[self.active_slot].ssid, err, self.consecutive_failures
        );
        // Alternate credential sets whenever the other slot is usable.
        let other = 1 - self.active_slot;
        if self.creds[other].is_usable() {
            self.active_slot = other;
        }
        self.next_attempt_ms = now_ms + self.backoff_ms;
        self.backoff_ms = (self.backoff_ms * 2).min(self.backoff_cap_ms);
        if self.consecutive_failures >= self.degraded_threshold {
            // Degraded keeps retrying, pinned at the cap.
            self.backoff_ms = self.backoff_cap_ms;
            self.state = LinkState::Degraded;
        } else {
            self.state = LinkState::Disconnected;
        }
    }

    fn record_link_lost(&mut self, now_ms: u64) {
        warn!("wifi: link lost, reconnecting");
        self.state = LinkState::Disconnected;
        self.consecutive_failures = 0;
        self.backoff_ms = self.backoff_initial_ms;
        self.next_attempt_ms = now_ms;
    }

    // ── platform layer ─────────────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_connect(&mut self) -> Result<(), LinkError> {
        let creds = &self.creds[self.active_slot];
        let client = ClientConfiguration {
            ssid: creds
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| LinkError::NoCredentials)?,
            password: creds
                .psk
                .as_str()
                .try_into()
                .map_err(|_| LinkError::NoCredentials)?,
            auth_method: if creds.psk.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        };
        self.wifi
            .wifi_mut()
            .set_configuration(&Configuration::Client(client))
            .map_err(|_| LinkError::ConnectFailed)?;
        if !self.wifi.is_started().unwrap_or(false) {
            self.wifi.start().map_err(|_| LinkError::ConnectFailed)?;
        }
        // Non-blocking connect, then bounded waits for association and
        // DHCP. Waiting past `wifi_connect_timeout_secs` hands the
        // attempt back to the retry policy instead of stalling the loop.
        self.wifi
            .wifi_mut()
            .connect()
            .map_err(|_| LinkError::ConnectFailed)?;
        let timeout = core::time::Duration::from_millis(self.connect_timeout_ms);
        self.wifi
            .wifi_wait_while(
                || self.wifi.wifi().is_connected().map(|c| !c),
                Some(timeout),
            )
            .map_err(|_| LinkError::Timeout)?;
        self.wifi
            .ip_wait_while(|| self.wifi.wifi().is_up().map(|up| !up), Some(timeout))
            .map_err(|_| LinkError::Timeout)?;
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_link_up(&self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(&mut self) -> Result<(), LinkError> {
        self.sim
            .attempted
            .push(self.creds[self.active_slot].ssid.as_str().into());
        if self.sim.fail_next > 0 {
            self.sim.fail_next -= 1;
            return Err(LinkError::ConnectFailed);
        }
        if self.sim.connect_takes_ms > self.connect_timeout_ms {
            return Err(LinkError::Timeout);
        }
        self.sim.connected = true;
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_link_up(&self) -> bool {
        self.sim.connected
    }

    // ── host simulation hooks ──────────────────────────────────────

    /// Fail the next `n` connect attempts.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_fail_attempts(&mut self, n: u32) {
        self.sim.fail_next = n;
    }

    /// Drop an established link; the next poll observes the loss.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_drop_link(&mut self) {
        self.sim.connected = false;
    }

    /// How long the simulated access point takes to complete association.
    /// Anything above the configured connect timeout makes attempts time
    /// out instead of succeeding.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_connect_takes(&mut self, ms: u64) {
        self.sim.connect_takes_ms = ms;
    }

    /// SSIDs in the order attempts were made.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_attempted(&self) -> &[String] {
        &self.sim.attempted
    }
}

#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
struct SimPlatform {
    fail_next: u32,
    connect_takes_ms: u64,
    connected: bool,
    attempted: Vec<String>,
}

impl ConnectivityPort for ConnectivityManager {
    fn state(&self) -> LinkState {
        self.state
    }

    fn poll(&mut self, now_ms: u64) -> LinkState {
        match self.state {
            LinkState::Disconnected | LinkState::Degraded => {
                if now_ms >= self.next_attempt_ms {
                    info!("wifi: connecting to '{}'", self.active_ssid());
                    self.state = LinkState::Connecting;
                }
            }
            LinkState::Connecting => match self.platform_connect() {
                Ok(()) => self.record_success(),
                Err(err) => self.record_failure(now_ms, err),
            },
            LinkState::Connected => {
                if !self.platform_link_up() {
                    self.record_link_lost(now_ms);
                }
            }
        }
        self.state
    }
}

// ───────────────────────────────────────────────────────────────────

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    fn config() -> DeviceConfig {
        let mut c = DeviceConfig::default();
        c.wifi_primary = WifiCredentials::new("alpha", "alpha-pass");
        c.wifi_secondary = WifiCredentials::new("beta", "beta-pass");
        c
    }

    /// Run poll until the adapter settles out of Connecting.
    fn poll_settled(mgr: &mut ConnectivityManager, now_ms: u64) -> LinkState {
        let mut state = mgr.poll(now_ms);
        if state == LinkState::Connecting {
            state = mgr.poll(now_ms);
        }
        state
    }

    #[test]
    fn connects_on_first_attempt() {
        let mut mgr = ConnectivityManager::new(&config());
        assert_eq!(mgr.state(), LinkState::Disconnected);
        assert_eq!(mgr.poll(0), LinkState::Connecting);
        assert_eq!(mgr.poll(0), LinkState::Connected);
        assert!(mgr.is_connected());
    }

    #[test]
    fn alternates_credentials_on_failure() {
        let mut mgr = ConnectivityManager::new(&config());
        mgr.sim_fail_attempts(3);
        let mut now = 0;
        while !mgr.is_connected() {
            poll_settled(&mut mgr, now);
            now += 1000;
        }
        assert_eq!(mgr.sim_attempted(), &["alpha", "beta", "alpha", "beta"]);
    }

    #[test]
    fn sticks_to_primary_when_secondary_unusable() {
        let mut c = config();
        c.wifi_secondary = WifiCredentials::new("", "");
        let mut mgr = ConnectivityManager::new(&c);
        mgr.sim_fail_attempts(2);
        let mut now = 0;
        while !mgr.is_connected() {
            poll_settled(&mut mgr, now);
            now += 1000;
        }
        assert_eq!(mgr.sim_attempted(), &["alpha", "alpha", "alpha"]);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = config();
        let mut mgr = ConnectivityManager::new(&cfg);
        mgr.sim_fail_attempts(u32::MAX);
        let mut now = 0u64;
        let mut waits = Vec::new();
        for _ in 0..8 {
            poll_settled(&mut mgr, now);
            let wait = mgr.retry_in_ms(now);
            waits.push(wait);
            now += wait;
        }
        assert_eq!(
            waits,
            vec![2_000, 4_000, 8_000, 16_000, 32_000, 60_000, 60_000, 60_000]
        );
    }

    #[test]
    fn degraded_after_threshold_and_recovers() {
        let mut c = config();
        c.degraded_threshold = 3;
        let mut mgr = ConnectivityManager::new(&c);
        mgr.sim_fail_attempts(3);
        let mut now = 0u64;
        for _ in 0..3 {
            poll_settled(&mut mgr, now);
            now += mgr.retry_in_ms(now);
        }
        assert_eq!(mgr.state(), LinkState::Degraded);
        // Degraded still retries and can recover.
        assert_eq!(poll_settled(&mut mgr, now), LinkState::Connected);
        assert_eq!(mgr.consecutive_failures(), 0);
    }

    #[test]
    fn stalled_association_times_out_to_disconnected() {
        let mut c = config();
        c.wifi_connect_timeout_secs = 1;
        let mut mgr = ConnectivityManager::new(&c);
        mgr.sim_connect_takes(1_500);
        assert_eq!(poll_settled(&mut mgr, 0), LinkState::Disconnected);
        assert_eq!(mgr.consecutive_failures(), 1);
        // A timed-out attempt swaps credentials like any other failure.
        assert_eq!(mgr.active_ssid(), "beta");
        // An AP answering inside the bound associates normally.
        mgr.sim_connect_takes(900);
        let now = mgr.retry_in_ms(0);
        assert_eq!(poll_settled(&mut mgr, now), LinkState::Connected);
    }

    #[test]
    fn no_retry_before_backoff_expires() {
        let mut mgr = ConnectivityManager::new(&config());
        mgr.sim_fail_attempts(u32::MAX);
        poll_settled(&mut mgr, 0);
        let before = mgr.sim_attempted().len();
        // Still inside the backoff window: no new attempt.
        assert_eq!(mgr.poll(500), LinkState::Disconnected);
        assert_eq!(mgr.sim_attempted().len(), before);
    }

    #[test]
    fn link_loss_returns_to_disconnected_with_fresh_backoff() {
        let mut mgr = ConnectivityManager::new(&config());
        poll_settled(&mut mgr, 0);
        assert!(mgr.is_connected());
        mgr.sim_drop_link();
        assert_eq!(mgr.poll(10_000), LinkState::Disconnected);
        // Retry fires immediately, not after an inherited backoff.
        assert_eq!(mgr.retry_in_ms(10_000), 0);
        assert_eq!(poll_settled(&mut mgr, 10_000), LinkState::Connected);
    }
}
