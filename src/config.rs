//! System configuration parameters.
//!
//! All externally supplied settings for the rain gauge node: Wi-Fi
//! credential pairs, MQTT broker and topics, the POSIX timezone rule, the
//! NTP server list, and the tunables for debounce, backoff and sync
//! cadence. Values can be overridden via NVS; the defaults below mirror the
//! fleet's reference deployment.

use serde::{Deserialize, Serialize};

use crate::timekeeping::tz::TzRule;

/// One SSID/passphrase pair. The node carries two and alternates between
/// them when association keeps failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    /// Network name, 1–32 printable ASCII bytes.
    pub ssid: heapless::String<32>,
    /// WPA2 passphrase (8–64 bytes) or empty for an open network.
    pub psk: heapless::String<64>,
}

impl WifiCredentials {
    pub fn new(ssid: &str, psk: &str) -> Self {
        Self {
            ssid: heapless::String::try_from(ssid).unwrap_or_default(),
            psk: heapless::String::try_from(psk).unwrap_or_default(),
        }
    }

    /// Whether this slot holds something that could plausibly associate.
    pub fn is_usable(&self) -> bool {
        !self.ssid.is_empty()
    }
}

/// Core device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    // --- Wi-Fi ---
    /// Preferred network.
    pub wifi_primary: WifiCredentials,
    /// Fallback network, tried after primary failures.
    pub wifi_secondary: WifiCredentials,
    /// Bounded association timeout (seconds).
    pub wifi_connect_timeout_secs: u16,

    // --- MQTT ---
    /// Broker hostname or IP address.
    pub mqtt_host: heapless::String<64>,
    /// Broker port (1883, or 8883 for TLS deployments).
    pub mqtt_port: u16,
    pub mqtt_username: heapless::String<32>,
    pub mqtt_password: heapless::String<64>,
    /// Client identifier — must be unique per deployed device.
    pub client_id: heapless::String<32>,
    /// Topic for per-impulse events.
    pub impulse_topic: heapless::String<64>,
    /// Topic for hourly totals.
    pub hourly_topic: heapless::String<64>,
    /// Messages older than this are dropped from the publish queue when the
    /// session is down (bounded-memory policy, deliberate loss).
    pub publish_stale_secs: u16,
    /// Broker network operation timeout (milliseconds). Bounds session
    /// establishment and publish handoff so an unresponsive broker never
    /// stalls the sampling loop.
    pub mqtt_timeout_ms: u32,

    // --- Time / NTP ---
    /// POSIX timezone rule, e.g. `CET-1CEST,M3.5.0/2,M10.5.0/3`.
    pub tz_rule: heapless::String<64>,
    /// Up to three servers, tried in priority order. Empty entries are
    /// skipped.
    pub ntp_servers: [heapless::String<48>; 3],
    /// Per-server query timeout (milliseconds).
    pub sntp_timeout_ms: u32,
    /// Periodic resync interval to bound clock drift (seconds).
    pub resync_interval_secs: u32,

    // --- Sensor ---
    /// Minimum interval between accepted bucket tips (milliseconds).
    pub debounce_ms: u32,

    // --- Reconnection policy ---
    /// First retry delay after a failure (seconds).
    pub backoff_initial_secs: u16,
    /// Retries never come faster than this once backed off (seconds).
    pub backoff_cap_secs: u16,
    /// Consecutive failures before the link manager enters Degraded and
    /// pins the retry interval at the cap.
    pub degraded_threshold: u8,

    // --- Timing ---
    /// Main cooperative loop tick (milliseconds).
    pub loop_tick_ms: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            // Wi-Fi
            wifi_primary: WifiCredentials::new("wifiname1", "wifipasswd1"),
            wifi_secondary: WifiCredentials::new("wifiname2", "wifipasswd2"),
            wifi_connect_timeout_secs: 15,

            // MQTT
            mqtt_host: heapless::String::try_from("mqttserverip").unwrap_or_default(),
            mqtt_port: 1883,
            mqtt_username: heapless::String::try_from("mqttuser").unwrap_or_default(),
            mqtt_password: heapless::String::try_from("mqttpasswd").unwrap_or_default(),
            client_id: heapless::String::try_from("ESP32-rfs-1").unwrap_or_default(),
            impulse_topic: heapless::String::try_from("test/rainfall/impulse")
                .unwrap_or_default(),
            hourly_topic: heapless::String::try_from("test/rainfall/hourly").unwrap_or_default(),
            publish_stale_secs: 60,
            mqtt_timeout_ms: 10_000,

            // Time / NTP — Europe/Bratislava: CET/CEST automatic DST
            tz_rule: heapless::String::try_from("CET-1CEST,M3.5.0/2,M10.5.0/3")
                .unwrap_or_default(),
            ntp_servers: [
                heapless::String::try_from("pool.ntp.org").unwrap_or_default(),
                heapless::String::try_from("time.nist.gov").unwrap_or_default(),
                heapless::String::try_from("time.google.com").unwrap_or_default(),
            ],
            sntp_timeout_ms: 5000,
            resync_interval_secs: 4 * 3600,

            // Sensor
            debounce_ms: crate::gauge::debounce::DEFAULT_DEBOUNCE_MS,

            // Reconnection policy
            backoff_initial_secs: 2,
            backoff_cap_secs: 60,
            degraded_threshold: 8,

            // Timing
            loop_tick_ms: 100,
        }
    }
}

impl DeviceConfig {
    /// Range-check every field that could brick the node if mis-set.
    /// Called before persisting and after loading from NVS.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.wifi_primary.is_usable() {
            return Err("primary Wi-Fi SSID empty");
        }
        if self.mqtt_host.is_empty() {
            return Err("MQTT host empty");
        }
        if self.mqtt_port == 0 {
            return Err("MQTT port zero");
        }
        if self.client_id.is_empty() {
            return Err("MQTT client id empty");
        }
        if self.impulse_topic.is_empty() || self.hourly_topic.is_empty() {
            return Err("MQTT topic empty");
        }
        if TzRule::parse(&self.tz_rule).is_err() {
            return Err("TZ rule unparseable");
        }
        if !self.ntp_servers.iter().any(|s| !s.is_empty()) {
            return Err("no NTP server configured");
        }
        if self.debounce_ms == 0 {
            return Err("debounce window zero");
        }
        if self.wifi_connect_timeout_secs == 0 {
            return Err("Wi-Fi connect timeout zero");
        }
        if self.mqtt_timeout_ms == 0 {
            return Err("MQTT operation timeout zero");
        }
        if self.backoff_initial_secs == 0 || self.backoff_cap_secs < self.backoff_initial_secs {
            return Err("backoff cap below initial delay");
        }
        if self.loop_tick_ms == 0 {
            return Err("loop tick zero");
        }
        Ok(())
    }
}
