//! Event sink that renders [`AppEvent`]s to the structured logger.
//!
//! On target this lands on the serial console through the ESP-IDF log
//! backend; on the host it goes wherever the test harness routes `log`.

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

#[derive(Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started => info!("service started"),
            AppEvent::TipDetected(ev) => {
                info!("tip #{} at uptime {} ms", ev.seq, ev.uptime_ms);
            }
            AppEvent::HourlyFinalized(total) => {
                info!(
                    "hour {}: {} tip(s){}",
                    total.hour_start_epoch,
                    total.count,
                    if total.provisional { " (provisional)" } else { "" }
                );
            }
            AppEvent::LinkChanged { from, to } => {
                info!("link {:?} -> {:?}", from, to);
            }
            AppEvent::ClockSynced { epoch, resync } => {
                info!(
                    "clock {} at epoch {}",
                    if *resync { "resynced" } else { "synced" },
                    epoch
                );
            }
            AppEvent::ClockSyncFailed => warn!("clock sync pass failed, will retry"),
            AppEvent::PublishDropped { total } => {
                warn!("publish queue dropped messages (total {})", total);
            }
        }
    }
}
