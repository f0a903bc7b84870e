//! Rain gauge firmware — main entry point.
//!
//! Hexagonal architecture with a cooperative polling loop:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Adapters (outer ring)                    │
//! │                                                              │
//! │  ConnectivityManager  MqttPublisher  SntpClient              │
//! │  (Wi-Fi STA)          (broker queue) (RFC 4330 UDP)          │
//! │  NvsConfigStore       LogEventSink   MonotonicClock          │
//! │                                                              │
//! │  ─────────────── Port Trait Boundary ──────────────────      │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────┐      │
//! │  │            AppService (pure logic)                 │      │
//! │  │  ImpulseDebouncer · RainAccumulator · ClockSync    │      │
//! │  └────────────────────────────────────────────────────┘      │
//! │                                                              │
//! │  TipSensor (GPIO ISR → edge queue) · Watchdog (TWDT)         │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use anyhow::Result;
use log::{info, warn};

use raingauge::adapters::log_sink::LogEventSink;
use raingauge::adapters::mqtt::MqttPublisher;
use raingauge::adapters::nvs::NvsConfigStore;
use raingauge::adapters::sntp::SntpClient;
use raingauge::adapters::time::MonotonicClock;
use raingauge::adapters::wifi::ConnectivityManager;
use raingauge::app::service::AppService;
use raingauge::config::DeviceConfig;
use raingauge::drivers::tip_sensor::{TipSensor, DEFAULT_TIP_GPIO};
use raingauge::drivers::watchdog::Watchdog;

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};

/// Longest tolerated main-loop stall before the TWDT reboots the node.
const WATCHDOG_TIMEOUT_MS: u32 = 10_000;

fn main() -> Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("rain gauge v{} starting", env!("CARGO_PKG_VERSION"));

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    // Config from NVS, falling back to compiled-in defaults rather than
    // refusing to boot — an unreachable node reports nothing at all.
    let config = match NvsConfigStore::new(nvs_partition.clone()) {
        Ok(store) => match store.load_or_default() {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("config load failed ({}), using defaults", e);
                DeviceConfig::default()
            }
        },
        Err(e) => {
            warn!("NVS unavailable ({}), using defaults", e);
            DeviceConfig::default()
        }
    };

    let watchdog = Watchdog::new(WATCHDOG_TIMEOUT_MS);
    let _sensor = TipSensor::install(DEFAULT_TIP_GPIO)?;

    let wifi = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sysloop.clone(), Some(nvs_partition))?,
        sysloop,
    )?;
    let link = ConnectivityManager::new(&config, wifi);

    let publisher = MqttPublisher::new(&config);
    let sntp = SntpClient::new();
    let sink = LogEventSink;
    let uptime = MonotonicClock::new();

    let mut app = AppService::new(&config, link, publisher, sntp, sink)?;

    let tick = Duration::from_millis(config.loop_tick_ms as u64);
    loop {
        app.tick(uptime.now_ms());
        watchdog.feed();
        std::thread::sleep(tick);
    }
}
