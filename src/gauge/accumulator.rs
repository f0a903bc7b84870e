//! Hourly rainfall accumulator.
//!
//! Buckets debounced impulses into local-time hours. The bucket identity is
//! `floor((utc_epoch + utc_offset(utc_epoch)) / 3600)` — local civil time
//! flattened to seconds. That single definition gives the right behaviour
//! at both DST transitions without special cases:
//!
//! - **fall back**: the repeated local hour maps to the *same* key on both
//!   passes, so it accumulates into one (two-wall-hour) bucket and the
//!   rollover fires once, never twice;
//! - **spring forward**: the skipped local hour's key is simply never
//!   reached, and the jump past it fires exactly one rollover.
//!
//! An impulse stamped exactly on a boundary belongs to the new hour
//! (`floor` puts the boundary instant in the upper bucket).
//!
//! Before the first NTP fix, impulses are parked in a bounded pending
//! buffer keyed by monotonic uptime; [`RainAccumulator::reconcile`]
//! reassigns them to wall-clock buckets once time is acquired, fabricating
//! and dropping nothing.

use log::{debug, info};

use super::{HourlyTotal, ImpulseEvent};
use crate::timekeeping::tz::TzRule;
use crate::timekeeping::ClockSync;

/// Pending pre-sync impulse stamps. 256 tips with no NTP fix is hours of
/// heavy rain; beyond it only the per-stamp resolution degrades (see
/// `pending_overflow`), never the count.
const PENDING_CAP: usize = 256;

const SECS_PER_HOUR: i64 = 3600;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    key: i64,
    count: u32,
}

pub struct RainAccumulator {
    /// Open bucket for the current local hour; `None` until the clock
    /// syncs (or the first post-sync poll).
    current: Option<Bucket>,
    /// Uptime stamps of impulses recorded before the first sync.
    pending: heapless::Vec<u64, PENDING_CAP>,
    /// Impulses that arrived pre-sync after `pending` filled. They are
    /// credited to the newest reconciled bucket — counted, just without
    /// their own stamp.
    pending_overflow: u32,
    /// Every impulse ever recorded (invariant checks, diagnostics).
    total_recorded: u64,
}

impl Default for RainAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl RainAccumulator {
    pub fn new() -> Self {
        Self {
            current: None,
            pending: heapless::Vec::new(),
            pending_overflow: 0,
            total_recorded: 0,
        }
    }

    /// Local-hour bucket key for a UTC instant.
    fn bucket_key(tz: &TzRule, epoch: i64) -> i64 {
        (epoch + i64::from(tz.utc_offset(epoch))).div_euclid(SECS_PER_HOUR)
    }

    /// UTC instant at which the local hour `key` begins. For the ambiguous
    /// fall-back hour this is the *first* (DST) occurrence — the instant
    /// the merged bucket opened.
    fn hour_start_epoch(tz: &TzRule, key: i64) -> i64 {
        let local = key * SECS_PER_HOUR;
        let (larger, smaller) = if tz.dst_offset() >= tz.std_offset() {
            (tz.dst_offset(), tz.std_offset())
        } else {
            (tz.std_offset(), tz.dst_offset())
        };
        // A larger eastward offset maps the same local time to an earlier
        // UTC instant, so trying it first picks the earlier occurrence.
        for offset in [larger, smaller] {
            let epoch = local - i64::from(offset);
            if tz.utc_offset(epoch) == offset {
                return epoch;
            }
        }
        // Skipped spring-forward hour: no self-consistent offset exists.
        local - i64::from(tz.std_offset())
    }

    fn finalize(tz: &TzRule, bucket: Bucket, provisional: bool) -> HourlyTotal {
        HourlyTotal {
            hour_start_epoch: Self::hour_start_epoch(tz, bucket.key),
            count: bucket.count,
            provisional,
        }
    }

    /// Record one debounced impulse.
    ///
    /// Returns the finalized previous hour when this impulse is the first
    /// of a new local hour — the snapshot and the counter reset happen in
    /// the same step, so no impulse can land between them.
    pub fn record_impulse(
        &mut self,
        event: &ImpulseEvent,
        clock: &ClockSync,
    ) -> Option<HourlyTotal> {
        self.total_recorded += 1;

        let Some(epoch) = clock.epoch_for_uptime(event.uptime_ms) else {
            if self.pending.push(event.uptime_ms).is_err() {
                self.pending_overflow += 1;
            }
            return None;
        };

        let key = Self::bucket_key(clock.tz(), epoch);
        match self.current {
            None => {
                self.current = Some(Bucket { key, count: 1 });
                None
            }
            Some(ref mut bucket) if key == bucket.key => {
                bucket.count += 1;
                None
            }
            Some(bucket) if key > bucket.key => {
                let total = Self::finalize(clock.tz(), bucket, false);
                self.current = Some(Bucket { key, count: 1 });
                debug!("accumulator: rollover on impulse, finalized {} tips", total.count);
                Some(total)
            }
            Some(ref mut bucket) => {
                // Clock re-anchored slightly backwards across a boundary.
                // Count into the open bucket rather than lose the impulse.
                bucket.count += 1;
                None
            }
        }
    }

    /// Check for an hour boundary without an impulse.
    ///
    /// Returns the finalized total (possibly zero tips — dry hours are
    /// published too) when the local hour has moved past the open bucket.
    pub fn poll_rollover(&mut self, uptime_ms: u64, clock: &ClockSync) -> Option<HourlyTotal> {
        let epoch = clock.epoch_for_uptime(uptime_ms)?;
        let key = Self::bucket_key(clock.tz(), epoch);

        match self.current {
            None => {
                self.current = Some(Bucket { key, count: 0 });
                None
            }
            Some(bucket) if key > bucket.key => {
                let total = Self::finalize(clock.tz(), bucket, false);
                self.current = Some(Bucket { key, count: 0 });
                Some(total)
            }
            Some(_) => None,
        }
    }

    /// Impulses counted in the hour currently accumulating. Before the
    /// first sync this is the count within the current *monotonic* hour.
    pub fn current_hour_count(&self, uptime_ms: u64) -> u32 {
        match self.current {
            Some(bucket) => bucket.count,
            None => {
                let hour_start = uptime_ms / 3_600_000 * 3_600_000;
                let stamped = self.pending.iter().filter(|&&t| t >= hour_start).count() as u32;
                stamped + self.pending_overflow
            }
        }
    }

    /// Reassign the pre-sync pending impulses to wall-clock hour buckets.
    ///
    /// Call once after the clock acquires its first fix. Fully elapsed
    /// hours are handed to `emit` (oldest first); the newest hour stays
    /// open as the current bucket. Neither fabricates nor drops impulses —
    /// only their hour assignment changes.
    pub fn reconcile(&mut self, clock: &ClockSync, mut emit: impl FnMut(HourlyTotal)) {
        if self.pending.is_empty() && self.pending_overflow == 0 {
            return;
        }

        let tz = clock.tz();
        let stamped = self.pending.len();
        for i in 0..stamped {
            let uptime = self.pending[i];
            // Synced clock: epoch_for_uptime is Some by contract here.
            let Some(epoch) = clock.epoch_for_uptime(uptime) else {
                return;
            };
            let key = Self::bucket_key(tz, epoch);
            match self.current {
                None => self.current = Some(Bucket { key, count: 1 }),
                Some(ref mut bucket) if key == bucket.key => bucket.count += 1,
                Some(bucket) if key > bucket.key => {
                    emit(Self::finalize(tz, bucket, false));
                    self.current = Some(Bucket { key, count: 1 });
                }
                Some(ref mut bucket) => bucket.count += 1,
            }
        }
        self.pending.clear();

        // Overflowed tips are newer than every stamped one; credit them to
        // the bucket left open.
        if self.pending_overflow > 0 {
            if let Some(ref mut bucket) = self.current {
                bucket.count += self.pending_overflow;
            }
            self.pending_overflow = 0;
        }

        info!(
            "accumulator: reconciled {} pre-sync tip(s) onto wall clock",
            stamped
        );
    }

    /// Snapshot the open bucket as a provisional total without waiting for
    /// the rollover (end-of-period flush). The bucket stays open with its
    /// counter reset, so a later rollover reports only the remainder.
    pub fn flush(&mut self, clock: &ClockSync) -> Option<HourlyTotal> {
        let bucket = self.current.as_mut()?;
        if bucket.count == 0 {
            return None;
        }
        let snapshot = *bucket;
        bucket.count = 0;
        Some(Self::finalize(clock.tz(), snapshot, true))
    }

    /// Every impulse recorded since boot (pending included).
    pub fn total_recorded(&self) -> u64 {
        self.total_recorded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::{SntpError, SntpPort};
    use crate::config::DeviceConfig;
    use crate::timekeeping::tz::days_from_civil;

    struct FixedSntp(i64);
    impl SntpPort for FixedSntp {
        fn query(&mut self, _server: &str, _timeout_ms: u32) -> Result<i64, SntpError> {
            Ok(self.0)
        }
    }

    /// A clock (CET/CEST rule from the default config) anchored so that
    /// uptime 0 corresponds to `epoch_at_boot`.
    fn synced_clock(epoch_at_boot: i64) -> ClockSync {
        let mut c = ClockSync::new(&DeviceConfig::default()).unwrap();
        let mut sntp = FixedSntp(epoch_at_boot);
        c.poll(0, true, &mut sntp).unwrap().unwrap();
        c
    }

    fn unsynced_clock() -> ClockSync {
        ClockSync::new(&DeviceConfig::default()).unwrap()
    }

    fn tip(seq: u32, uptime_ms: u64) -> ImpulseEvent {
        ImpulseEvent { seq, uptime_ms }
    }

    /// Winter UTC midnight (CET, offset +1 h, no transition nearby).
    fn winter_midnight() -> i64 {
        days_from_civil(2025, 1, 15) * 86_400
    }

    #[test]
    fn impulses_in_one_hour_accumulate() {
        let clock = synced_clock(winter_midnight());
        let mut acc = RainAccumulator::new();
        // 0:10, 0:20, 0:45 in uptime.
        assert!(acc.record_impulse(&tip(1, 10 * 60_000), &clock).is_none());
        assert!(acc.record_impulse(&tip(2, 20 * 60_000), &clock).is_none());
        assert!(acc.record_impulse(&tip(3, 45 * 60_000), &clock).is_none());
        assert_eq!(acc.current_hour_count(45 * 60_000), 3);
    }

    #[test]
    fn rollover_on_impulse_snapshots_and_resets() {
        // 3 tips at 0:10/0:20/0:45, then 2 at 1:05/1:50.
        let boot = winter_midnight();
        let clock = synced_clock(boot);
        let mut acc = RainAccumulator::new();
        for (i, min) in [10u64, 20, 45].iter().enumerate() {
            assert!(acc.record_impulse(&tip(i as u32 + 1, min * 60_000), &clock).is_none());
        }

        let total = acc.record_impulse(&tip(4, 65 * 60_000), &clock).unwrap();
        assert_eq!(total.count, 3);
        assert_eq!(total.hour_start_epoch, boot);
        assert!(!total.provisional);

        assert!(acc.record_impulse(&tip(5, 110 * 60_000), &clock).is_none());
        assert_eq!(acc.current_hour_count(110 * 60_000), 2);

        // Remainder of hour 1 is a flushable partial.
        let partial = acc.flush(&clock).unwrap();
        assert_eq!(partial.count, 2);
        assert_eq!(partial.hour_start_epoch, boot + 3600);
        assert!(partial.provisional);
    }

    #[test]
    fn poll_rollover_fires_once_per_boundary() {
        let clock = synced_clock(winter_midnight());
        let mut acc = RainAccumulator::new();
        assert!(acc.poll_rollover(0, &clock).is_none()); // opens bucket

        acc.record_impulse(&tip(1, 30 * 60_000), &clock);

        // Many polls inside the hour: nothing fires.
        for min in 31..60 {
            assert!(acc.poll_rollover(min * 60_000, &clock).is_none());
        }

        let total = acc.poll_rollover(60 * 60_000, &clock).unwrap();
        assert_eq!(total.count, 1);
        // And nothing more until the next boundary.
        assert!(acc.poll_rollover(61 * 60_000, &clock).is_none());
    }

    #[test]
    fn dry_hours_publish_zero_totals() {
        let clock = synced_clock(winter_midnight());
        let mut acc = RainAccumulator::new();
        acc.poll_rollover(0, &clock);
        let total = acc.poll_rollover(3_600_000, &clock).unwrap();
        assert_eq!(total.count, 0);
    }

    #[test]
    fn boundary_impulse_belongs_to_new_hour() {
        let boot = winter_midnight();
        let clock = synced_clock(boot);
        let mut acc = RainAccumulator::new();
        acc.record_impulse(&tip(1, 10 * 60_000), &clock);

        // Exactly at the 01:00 boundary: finalizes hour 0 with one tip and
        // counts this tip into hour 1.
        let total = acc.record_impulse(&tip(2, 3_600_000), &clock).unwrap();
        assert_eq!(total.count, 1);
        assert_eq!(acc.current_hour_count(3_600_000), 1);
    }

    #[test]
    fn fall_back_merges_ambiguous_hour() {
        // Boot at 2025-10-25 22:00 UTC; fall back at 2025-10-26 01:00 UTC
        // (03:00 CEST → 02:00 CET).
        let boot = days_from_civil(2025, 10, 25) * 86_400 + 22 * 3600;
        let clock = synced_clock(boot);
        let mut acc = RainAccumulator::new();

        let hour = 3_600_000u64;
        // 2025-10-26 00:30 UTC = 02:30 CEST — first pass of local hour 2.
        acc.record_impulse(&tip(1, 2 * hour + 30 * 60_000), &clock);
        // 2025-10-26 01:30 UTC = 02:30 CET — second pass, same bucket.
        let rolled = acc.record_impulse(&tip(2, 3 * hour + 30 * 60_000), &clock);
        assert!(rolled.is_none(), "rollover must be suppressed inside the ambiguous hour");
        assert_eq!(acc.current_hour_count(3 * hour + 30 * 60_000), 2);

        // 02:00 UTC = 03:00 CET — the merged bucket finally closes, once.
        let total = acc.poll_rollover(4 * hour, &clock).unwrap();
        assert_eq!(total.count, 2);
        // The bucket opened at its first (CEST) occurrence: 00:00 UTC.
        assert_eq!(
            total.hour_start_epoch,
            days_from_civil(2025, 10, 26) * 86_400
        );
    }

    #[test]
    fn spring_forward_fires_single_rollover() {
        // Boot at 2025-03-30 00:30 UTC = 01:30 CET. Spring forward at
        // 01:00 UTC (02:00 CET → 03:00 CEST).
        let boot = days_from_civil(2025, 3, 30) * 86_400 + 1800;
        let clock = synced_clock(boot);
        let mut acc = RainAccumulator::new();

        acc.record_impulse(&tip(1, 0), &clock); // 01:30 CET
        let total = acc.poll_rollover(30 * 60_000, &clock).unwrap(); // 03:00 CEST
        assert_eq!(total.count, 1);
        // No second rollover for the skipped local hour 02.
        assert!(acc.poll_rollover(31 * 60_000, &clock).is_none());
    }

    #[test]
    fn daily_sum_matches_total_across_fall_back() {
        // One tip in every wall-clock hour of the 25-hour fall-back day.
        let boot = days_from_civil(2025, 10, 25) * 86_400 + 23 * 3600; // 25th 23:00 UTC = 26th 01:00 CEST
        let clock = synced_clock(boot);
        let mut acc = RainAccumulator::new();

        let mut finalized = 0u64;
        let mut seq = 0;
        for h in 0..25u64 {
            seq += 1;
            if let Some(t) =
                acc.record_impulse(&tip(seq, h * 3_600_000 + 30 * 60_000), &clock)
            {
                finalized += u64::from(t.count);
            }
        }
        if let Some(t) = acc.flush(&clock) {
            finalized += u64::from(t.count);
        }
        assert_eq!(finalized, 25);
        assert_eq!(acc.total_recorded(), 25);
    }

    #[test]
    fn pre_sync_impulses_reconcile_without_loss() {
        let mut clock = unsynced_clock();
        let mut acc = RainAccumulator::new();

        // Tips at uptime 0:10, 0:50, 1:20 with no wall clock.
        acc.record_impulse(&tip(1, 10 * 60_000), &clock);
        acc.record_impulse(&tip(2, 50 * 60_000), &clock);
        acc.record_impulse(&tip(3, 80 * 60_000), &clock);
        assert_eq!(acc.current_hour_count(80 * 60_000), 1); // monotonic hour 1

        // Clock syncs at uptime 90 min; boot corresponded to a winter
        // midnight, so tips land in local hours 1 and 2 (CET = UTC+1).
        let boot = winter_midnight();
        let mut sntp = FixedSntp(boot + 90 * 60);
        clock.poll(90 * 60_000, true, &mut sntp).unwrap().unwrap();

        let mut emitted = std::vec::Vec::new();
        acc.reconcile(&clock, |t| emitted.push(t));

        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].count, 2);
        assert_eq!(emitted[0].hour_start_epoch, boot);
        assert_eq!(acc.current_hour_count(90 * 60_000), 1);
        assert_eq!(acc.total_recorded(), 3);
    }

    #[test]
    fn pending_overflow_is_counted_not_lost() {
        let mut clock = unsynced_clock();
        let mut acc = RainAccumulator::new();

        // Fill the pending buffer and then some.
        for i in 0..(PENDING_CAP as u64 + 20) {
            acc.record_impulse(&tip(i as u32 + 1, i * 100), &clock);
        }
        assert_eq!(acc.total_recorded(), PENDING_CAP as u64 + 20);

        let mut sntp = FixedSntp(winter_midnight());
        clock.poll(0, true, &mut sntp).unwrap().unwrap();

        let mut sum = 0u64;
        acc.reconcile(&clock, |t| sum += u64::from(t.count));
        sum += u64::from(acc.current_hour_count(0));
        assert_eq!(sum, PENDING_CAP as u64 + 20);
    }

    #[test]
    fn flush_then_rollover_reports_remainder_only() {
        let boot = winter_midnight();
        let clock = synced_clock(boot);
        let mut acc = RainAccumulator::new();

        acc.record_impulse(&tip(1, 10 * 60_000), &clock);
        let partial = acc.flush(&clock).unwrap();
        assert_eq!(partial.count, 1);
        assert!(partial.provisional);

        acc.record_impulse(&tip(2, 20 * 60_000), &clock);
        let total = acc.poll_rollover(3_600_000, &clock).unwrap();
        assert_eq!(total.count, 1); // remainder, not 2
    }

    #[test]
    fn flush_of_empty_bucket_is_none() {
        let clock = synced_clock(winter_midnight());
        let mut acc = RainAccumulator::new();
        acc.poll_rollover(0, &clock);
        assert!(acc.flush(&clock).is_none());
    }
}
