//! MQTT publisher adapter — bounded, lossy outbound telemetry.
//!
//! Messages are queued locally and drained whenever a broker session is
//! up. The queue is deliberately small and lossy:
//!
//! * overflow drops the OLDEST entry (freshest data wins),
//! * entries that sat longer than the staleness window are discarded,
//! * every drop is counted, never silent.
//!
//! A rain gauge is a telemetry source, not a datastore; losing a stale
//! reading beats blocking the sampling loop or growing without bound.
//!
//! The broker session follows the Wi-Fi link: torn down on link loss,
//! rebuilt from scratch on the next poll with the link up.

use log::{debug, info, warn};

use crate::app::ports::PublisherPort;
use crate::config::DeviceConfig;
use crate::gauge::{HourlyTotal, ImpulseEvent};

#[cfg(target_os = "espidf")]
use esp_idf_svc::mqtt::client::{EspMqttClient, MqttClientConfiguration, QoS};

/// Outbound queue depth. At one message per bucket tip this covers a
/// cloudburst minute with the link down.
pub const QUEUE_CAP: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Payload {
    Impulse {
        seq: u32,
        uptime_ms: u64,
        epoch: Option<i64>,
    },
    Hourly {
        hour_start_epoch: i64,
        count: u32,
        provisional: bool,
    },
}

#[derive(Debug, Clone, Copy)]
struct Queued {
    payload: Payload,
    enqueued_ms: u64,
}

pub struct MqttPublisher {
    queue: heapless::Deque<Queued, QUEUE_CAP>,
    impulse_topic: heapless::String<64>,
    hourly_topic: heapless::String<64>,
    stale_ms: u64,
    dropped: u32,
    published: u32,
    session_up: bool,
    /// Clock reference for staleness, refreshed on every poll. Enqueue
    /// calls between polls reuse the last tick's value, which is within
    /// one loop tick of the truth.
    last_now_ms: u64,

    #[cfg(target_os = "espidf")]
    config: DeviceConfig,
    #[cfg(target_os = "espidf")]
    client: Option<EspMqttClient<'static>>,
    #[cfg(not(target_os = "espidf"))]
    sim: SimBroker,
}

impl MqttPublisher {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            queue: heapless::Deque::new(),
            impulse_topic: config.impulse_topic.clone(),
            hourly_topic: config.hourly_topic.clone(),
            stale_ms: config.publish_stale_secs as u64 * 1000,
            dropped: 0,
            published: 0,
            session_up: false,
            last_now_ms: 0,
            #[cfg(target_os = "espidf")]
            config: config.clone(),
            #[cfg(target_os = "espidf")]
            client: None,
            #[cfg(not(target_os = "espidf"))]
            sim: SimBroker::default(),
        }
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    pub fn published_count(&self) -> u32 {
        self.published
    }

    fn enqueue(&mut self, payload: Payload) {
        if self.queue.is_full() {
            // Drop-oldest: the freshest reading is the valuable one.
            let _ = self.queue.pop_front();
            self.dropped = self.dropped.saturating_add(1);
            debug!("mqtt: queue full, dropped oldest (total {})", self.dropped);
        }
        let entry = Queued {
            payload,
            enqueued_ms: self.last_now_ms,
        };
        // Cannot fail: a slot was just freed if the queue was full.
        let _ = self.queue.push_back(entry);
    }

    fn drop_stale(&mut self, now_ms: u64) {
        while let Some(front) = self.queue.front() {
            if now_ms.saturating_sub(front.enqueued_ms) <= self.stale_ms {
                break;
            }
            let _ = self.queue.pop_front();
            self.dropped = self.dropped.saturating_add(1);
        }
    }

    fn render(payload: &Payload) -> (bool, serde_json::Value) {
        match payload {
            Payload::Impulse {
                seq,
                uptime_ms,
                epoch,
            } => (
                true,
                serde_json::json!({
                    "seq": seq,
                    "uptime_ms": uptime_ms,
                    "epoch": epoch,
                }),
            ),
            Payload::Hourly {
                hour_start_epoch,
                count,
                provisional,
            } => (
                false,
                serde_json::json!({
                    "hour_start": hour_start_epoch,
                    "count": count,
                    "provisional": provisional,
                }),
            ),
        }
    }

    /// Publish every queued message in FIFO order. Stops at the first
    /// transport error and leaves the remainder queued.
    fn drain(&mut self) {
        while let Some(front) = self.queue.front().copied() {
            let (is_impulse, body) = Self::render(&front.payload);
            let topic = if is_impulse {
                self.impulse_topic.clone()
            } else {
                self.hourly_topic.clone()
            };
            match self.platform_publish(&topic, &body) {
                Ok(()) => {
                    let _ = self.queue.pop_front();
                    self.published = self.published.saturating_add(1);
                }
                Err(()) => {
                    warn!("mqtt: publish failed, session presumed lost");
                    self.teardown();
                    break;
                }
            }
        }
    }

    fn teardown(&mut self) {
        if self.session_up {
            info!("mqtt: session closed");
        }
        self.session_up = false;
        #[cfg(target_os = "espidf")]
        {
            self.client = None;
        }
    }

    // ── platform layer ─────────────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_connect(&mut self) -> Result<(), ()> {
        let url = format!("mqtt://{}:{}", self.config.mqtt_host, self.config.mqtt_port);
        let conf = MqttClientConfiguration {
            client_id: Some(self.config.client_id.as_str()),
            username: Some(self.config.mqtt_username.as_str()),
            password: Some(self.config.mqtt_password.as_str()),
            network_timeout: core::time::Duration::from_millis(
                self.config.mqtt_timeout_ms as u64,
            ),
            ..Default::default()
        };
        let client = EspMqttClient::new_cb(&url, &conf, |_event| {}).map_err(|_| ())?;
        self.client = Some(client);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_publish(&mut self, topic: &str, body: &serde_json::Value) -> Result<(), ()> {
        let client = self.client.as_mut().ok_or(())?;
        let bytes = serde_json::to_vec(body).map_err(|_| ())?;
        client
            .enqueue(topic, QoS::AtLeastOnce, false, &bytes)
            .map(|_| ())
            .map_err(|_| ())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(&mut self) -> Result<(), ()> {
        if self.sim.refuse_connect {
            return Err(());
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_publish(&mut self, topic: &str, body: &serde_json::Value) -> Result<(), ()> {
        if self.sim.fail_publishes > 0 {
            self.sim.fail_publishes -= 1;
            return Err(());
        }
        self.sim.delivered.push((topic.into(), body.clone()));
        Ok(())
    }

    // ── host simulation hooks ──────────────────────────────────────

    /// Messages the simulated broker has accepted, in delivery order.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_delivered(&self) -> &[(String, serde_json::Value)] {
        &self.sim.delivered
    }

    /// Fail the next `n` publish calls (simulated transport fault).
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_fail_publishes(&mut self, n: u32) {
        self.sim.fail_publishes = n;
    }

    /// Refuse session establishment until cleared.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_refuse_connect(&mut self, refuse: bool) {
        self.sim.refuse_connect = refuse;
    }
}

#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
struct SimBroker {
    refuse_connect: bool,
    fail_publishes: u32,
    delivered: Vec<(String, serde_json::Value)>,
}

impl PublisherPort for MqttPublisher {
    fn publish_impulse(&mut self, event: &ImpulseEvent, epoch: Option<i64>) {
        self.enqueue(Payload::Impulse {
            seq: event.seq,
            uptime_ms: event.uptime_ms,
            epoch,
        });
    }

    fn publish_hourly(&mut self, total: &HourlyTotal) {
        self.enqueue(Payload::Hourly {
            hour_start_epoch: total.hour_start_epoch,
            count: total.count,
            provisional: total.provisional,
        });
    }

    fn poll(&mut self, link_up: bool, now_ms: u64) {
        self.last_now_ms = now_ms;
        if !link_up {
            self.teardown();
            self.drop_stale(now_ms);
            return;
        }
        if !self.session_up {
            match self.platform_connect() {
                Ok(()) => {
                    info!("mqtt: session established");
                    self.session_up = true;
                }
                Err(()) => {
                    // Link is up but the broker is not; age the queue
                    // so it cannot pin stale data forever.
                    self.drop_stale(now_ms);
                    return;
                }
            }
        }
        self.drain();
    }

    fn dropped_count(&self) -> u32 {
        self.dropped
    }
}

// ───────────────────────────────────────────────────────────────────

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    fn publisher() -> MqttPublisher {
        MqttPublisher::new(&DeviceConfig::default())
    }

    fn tip(seq: u32, uptime_ms: u64) -> ImpulseEvent {
        ImpulseEvent { seq, uptime_ms }
    }

    #[test]
    fn drains_queue_when_link_up() {
        let mut p = publisher();
        p.publish_impulse(&tip(1, 500), Some(1_700_000_000));
        p.publish_hourly(&HourlyTotal {
            hour_start_epoch: 1_700_000_000,
            count: 3,
            provisional: false,
        });
        assert_eq!(p.queued_count(), 2);

        p.poll(true, 1000);
        assert_eq!(p.queued_count(), 0);
        let delivered = p.sim_delivered();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].0, "test/rainfall/impulse");
        assert_eq!(delivered[0].1["seq"], 1);
        assert_eq!(delivered[0].1["epoch"], 1_700_000_000_i64);
        assert_eq!(delivered[1].0, "test/rainfall/hourly");
        assert_eq!(delivered[1].1["count"], 3);
        assert_eq!(delivered[1].1["provisional"], false);
    }

    #[test]
    fn unsynced_impulse_carries_null_epoch() {
        let mut p = publisher();
        p.publish_impulse(&tip(1, 500), None);
        p.poll(true, 1000);
        assert!(p.sim_delivered()[0].1["epoch"].is_null());
    }

    #[test]
    fn never_publishes_while_link_down() {
        let mut p = publisher();
        p.publish_impulse(&tip(1, 500), None);
        p.poll(false, 1000);
        assert_eq!(p.sim_delivered().len(), 0);
        assert_eq!(p.queued_count(), 1);
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let mut p = publisher();
        for seq in 0..(QUEUE_CAP as u32 + 5) {
            p.publish_impulse(&tip(seq, seq as u64 * 10), None);
        }
        assert_eq!(p.queued_count(), QUEUE_CAP);
        assert_eq!(p.dropped_count(), 5);

        p.poll(true, 1000);
        // Oldest five (seq 0..5) were sacrificed; seq 5 survives.
        assert_eq!(p.sim_delivered()[0].1["seq"], 5);
    }

    #[test]
    fn stale_entries_age_out_while_session_is_down() {
        let mut p = publisher();
        p.poll(false, 0);
        p.publish_impulse(&tip(1, 0), None);
        // Default staleness is 60 s; 61 s later the entry is gone.
        p.poll(false, 61_000);
        assert_eq!(p.queued_count(), 0);
        assert_eq!(p.dropped_count(), 1);
        // A fresh message still goes out once the link returns.
        p.publish_impulse(&tip(2, 61_000), None);
        p.poll(true, 61_500);
        assert_eq!(p.sim_delivered().len(), 1);
        assert_eq!(p.sim_delivered()[0].1["seq"], 2);
    }

    #[test]
    fn publish_failure_tears_down_session_and_keeps_message() {
        let mut p = publisher();
        p.poll(true, 0);
        p.sim_fail_publishes(1);
        p.publish_impulse(&tip(1, 100), None);
        p.poll(true, 200);
        // Message survived the failed attempt and went out on retry.
        assert_eq!(p.queued_count(), 1);
        p.poll(true, 300);
        assert_eq!(p.queued_count(), 0);
        assert_eq!(p.sim_delivered().len(), 1);
    }

    #[test]
    fn refused_session_keeps_fresh_messages_queued() {
        let mut p = publisher();
        p.sim_refuse_connect(true);
        p.publish_impulse(&tip(1, 0), None);
        p.poll(true, 1000);
        assert_eq!(p.sim_delivered().len(), 0);
        assert_eq!(p.queued_count(), 1);
        p.sim_refuse_connect(false);
        p.poll(true, 2000);
        assert_eq!(p.sim_delivered().len(), 1);
    }
}
