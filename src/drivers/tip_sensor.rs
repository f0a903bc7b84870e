//! Tipping-bucket sensor driver.
//!
//! ## Hardware
//!
//! A magnet on the see-saw bucket closes a reed switch once per tip.
//! Active low with an external pull-up; the GPIO fires on the falling
//! edge. The ISR does the bare minimum — read the system timer and push
//! the raw edge timestamp into the lock-free queue in
//! [`crate::events`] — and the main loop drains and debounces from
//! there. Contact bounce is NOT filtered here; that is the
//! [`ImpulseDebouncer`](crate::gauge::debounce::ImpulseDebouncer)'s job.

use log::info;

use crate::error::Error;

#[cfg(target_os = "espidf")]
use esp_idf_sys::*;

/// Default reed-switch GPIO.
pub const DEFAULT_TIP_GPIO: i32 = 27;

/// ISR handler — registered on the falling edge of the sensor GPIO.
/// Lock-free push; safe in interrupt context.
#[cfg(target_os = "espidf")]
unsafe extern "C" fn tip_isr(_arg: *mut core::ffi::c_void) {
    let uptime_ms = (unsafe { esp_timer_get_time() } / 1000) as u64;
    crate::events::push_edge(uptime_ms);
}

pub struct TipSensor {
    gpio: i32,
}

impl TipSensor {
    /// Configure the GPIO and attach the edge ISR.
    #[cfg(target_os = "espidf")]
    pub fn install(gpio: i32) -> Result<Self, Error> {
        // SAFETY: one-shot init from main() before the event loop starts.
        unsafe {
            let cfg = gpio_config_t {
                pin_bit_mask: 1u64 << gpio,
                mode: gpio_mode_t_GPIO_MODE_INPUT,
                pull_up_en: gpio_pullup_t_GPIO_PULLUP_ENABLE,
                pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
                intr_type: gpio_int_type_t_GPIO_INTR_NEGEDGE,
            };
            if gpio_config(&cfg) != ESP_OK {
                return Err(Error::Init("tip sensor GPIO config failed"));
            }
            // Tolerate an already-installed ISR service.
            let ret = gpio_install_isr_service(0);
            if ret != ESP_OK && ret != ESP_ERR_INVALID_STATE {
                return Err(Error::Init("GPIO ISR service install failed"));
            }
            if gpio_isr_handler_add(gpio, Some(tip_isr), core::ptr::null_mut()) != ESP_OK {
                return Err(Error::Init("tip sensor ISR attach failed"));
            }
        }
        info!("tip_sensor: armed on GPIO{}", gpio);
        Ok(Self { gpio })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn install(gpio: i32) -> Result<Self, Error> {
        info!("tip_sensor(sim): armed on GPIO{}", gpio);
        Ok(Self { gpio })
    }

    pub fn gpio(&self) -> i32 {
        self.gpio
    }

    /// Inject a raw switch edge (host simulation).
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_edge(&self, uptime_ms: u64) {
        crate::events::push_edge(uptime_ms);
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn installs_on_host() {
        let sensor = TipSensor::install(DEFAULT_TIP_GPIO).unwrap();
        assert_eq!(sensor.gpio(), DEFAULT_TIP_GPIO);
    }
}
