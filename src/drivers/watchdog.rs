//! Task Watchdog Timer wrapper.
//!
//! An outdoor node has nobody around to press reset. The main loop
//! subscribes to the TWDT and feeds it every tick; a stall reboots the
//! device and the accumulator starts over (pre-sync buffering makes the
//! lost hour provisional, not silent).

#[cfg(target_os = "espidf")]
use esp_idf_sys::*;

use log::info;

pub struct Watchdog {
    #[cfg(target_os = "espidf")]
    subscribed: bool,
}

impl Watchdog {
    /// Subscribe the current task with the given timeout.
    pub fn new(timeout_ms: u32) -> Self {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: TWDT API, called once from the main task.
            unsafe {
                let cfg = esp_task_wdt_config_t {
                    timeout_ms,
                    idle_core_mask: 0,
                    trigger_panic: true,
                };
                let ret = esp_task_wdt_reconfigure(&cfg);
                if ret != ESP_OK {
                    log::warn!("watchdog: reconfigure returned {}", ret);
                }
                let subscribed = esp_task_wdt_add(core::ptr::null_mut()) == ESP_OK;
                if subscribed {
                    info!("watchdog: armed ({} ms, panic on stall)", timeout_ms);
                } else {
                    log::warn!("watchdog: subscription failed");
                }
                Self { subscribed }
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            info!("watchdog(sim): armed ({} ms, no-op)", timeout_ms);
            Self {}
        }
    }

    /// Call from every main-loop tick.
    pub fn feed(&self) {
        #[cfg(target_os = "espidf")]
        if self.subscribed {
            // SAFETY: resets the calling task's TWDT entry only.
            unsafe {
                esp_task_wdt_reset();
            }
        }
    }
}
