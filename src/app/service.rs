//! Application service — the cooperative main-loop orchestrator.
//!
//! One `tick()` per loop iteration wires the pipeline together:
//!
//! ```text
//!   ISR edge queue ─▶ debounce ─▶ accumulate ─▶ publish
//!                                    ▲
//!        link poll ── clock poll ────┘ (reconcile on first fix)
//! ```
//!
//! The service owns the domain state (debouncer, accumulator, clock) and
//! borrows the outside world through port traits, so the whole loop runs
//! under test with simulated adapters.

use crate::app::events::AppEvent;
use crate::app::ports::{ConnectivityPort, EventSink, LinkState, PublisherPort, SntpPort};
use crate::config::DeviceConfig;
use crate::error::Error;
use crate::events;
use crate::gauge::accumulator::RainAccumulator;
use crate::gauge::debounce::ImpulseDebouncer;
use crate::timekeeping::ClockSync;

pub struct AppService<C, P, S, E>
where
    C: ConnectivityPort,
    P: PublisherPort,
    S: SntpPort,
    E: EventSink,
{
    debouncer: ImpulseDebouncer,
    accumulator: RainAccumulator,
    clock: ClockSync,
    link: C,
    publisher: P,
    sntp: S,
    sink: E,
    last_link_state: LinkState,
    last_dropped: u32,
    started: bool,
}

impl<C, P, S, E> AppService<C, P, S, E>
where
    C: ConnectivityPort,
    P: PublisherPort,
    S: SntpPort,
    E: EventSink,
{
    pub fn new(
        config: &DeviceConfig,
        link: C,
        publisher: P,
        sntp: S,
        sink: E,
    ) -> Result<Self, Error> {
        Ok(Self {
            debouncer: ImpulseDebouncer::new(config.debounce_ms),
            accumulator: RainAccumulator::new(),
            clock: ClockSync::new(config)?,
            link,
            publisher,
            sntp,
            sink,
            last_link_state: LinkState::Disconnected,
            last_dropped: 0,
            started: false,
        })
    }

    pub fn clock(&self) -> &ClockSync {
        &self.clock
    }

    pub fn link(&self) -> &C {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut C {
        &mut self.link
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn publisher_mut(&mut self) -> &mut P {
        &mut self.publisher
    }

    pub fn sink(&self) -> &E {
        &self.sink
    }

    /// Tips recorded since boot (accepted by the debouncer).
    pub fn tips_recorded(&self) -> u64 {
        self.accumulator.total_recorded()
    }

    /// Tips counted into the hour bucket currently open.
    pub fn current_hour_count(&self, now_ms: u64) -> u32 {
        self.accumulator.current_hour_count(now_ms)
    }

    /// One cooperative loop iteration.
    pub fn tick(&mut self, now_ms: u64) {
        if !self.started {
            self.started = true;
            self.sink.emit(&AppEvent::Started);
        }

        // Link first, so everything downstream sees fresh state.
        let link_state = self.link.poll(now_ms);
        if link_state != self.last_link_state {
            self.sink.emit(&AppEvent::LinkChanged {
                from: self.last_link_state,
                to: link_state,
            });
            self.last_link_state = link_state;
        }
        let link_up = link_state == LinkState::Connected;

        // Clock schedule. The first fix triggers reconciliation of
        // impulses buffered before time was known.
        if let Some(outcome) = self.clock.poll(now_ms, link_up, &mut self.sntp) {
            match outcome {
                Ok(fix) => {
                    self.sink.emit(&AppEvent::ClockSynced {
                        epoch: fix.epoch,
                        resync: fix.resync,
                    });
                    if !fix.resync {
                        let publisher = &mut self.publisher;
                        let sink = &mut self.sink;
                        self.accumulator.reconcile(&self.clock, |total| {
                            publisher.publish_hourly(&total);
                            sink.emit(&AppEvent::HourlyFinalized(total));
                        });
                    }
                }
                Err(_) => self.sink.emit(&AppEvent::ClockSyncFailed),
            }
        }

        // Drain raw switch edges through the debouncer into the
        // accumulator, publishing per-impulse telemetry as we go.
        let debouncer = &mut self.debouncer;
        let accumulator = &mut self.accumulator;
        let clock = &self.clock;
        let publisher = &mut self.publisher;
        let sink = &mut self.sink;
        events::drain_edges(|edge_uptime_ms| {
            if let Some(event) = debouncer.offer(edge_uptime_ms) {
                sink.emit(&AppEvent::TipDetected(event));
                let epoch = clock.epoch_for_uptime(event.uptime_ms);
                publisher.publish_impulse(&event, epoch);
                if let Some(total) = accumulator.record_impulse(&event, clock) {
                    publisher.publish_hourly(&total);
                    sink.emit(&AppEvent::HourlyFinalized(total));
                }
            }
        });

        // Dry-hour boundaries roll over without an impulse.
        if let Some(total) = self.accumulator.poll_rollover(now_ms, &self.clock) {
            self.publisher.publish_hourly(&total);
            self.sink.emit(&AppEvent::HourlyFinalized(total));
        }

        self.publisher.poll(link_up, now_ms);

        let dropped = self.publisher.dropped_count();
        if dropped > self.last_dropped {
            self.last_dropped = dropped;
            self.sink.emit(&AppEvent::PublishDropped { total: dropped });
        }
    }

    /// Publish the open bucket as a provisional total (controlled
    /// shutdown or diagnostic snapshot) and push it toward the broker.
    pub fn flush(&mut self, now_ms: u64) {
        if let Some(total) = self.accumulator.flush(&self.clock) {
            self.publisher.publish_hourly(&total);
            self.sink.emit(&AppEvent::HourlyFinalized(total));
        }
        self.publisher.poll(self.last_link_state == LinkState::Connected, now_ms);
    }
}
