//! Wall-clock time service.
//!
//! [`ClockSync`] anchors the monotonic uptime counter to UTC via NTP and
//! answers local-time queries through the configured POSIX DST rule. It is
//! a process-lifetime service object injected into its consumers (never an
//! ambient global) so the accumulator can be tested against a fake clock.
//!
//! Sync policy: before the first fix, attempt every [`RETRY_INTERVAL_MS`]
//! while the link is up, trying each configured server in priority order
//! with a bounded per-server timeout. After a fix, resynchronize every
//! `resync_interval_secs` to bound drift. Failures are never fatal — the
//! node keeps accumulating on monotonic time and reconciles later.

pub mod tz;

use log::{info, warn};

use crate::app::ports::SntpPort;
use crate::config::DeviceConfig;
use crate::error::{Error, TimeError};
use self::tz::{LocalTime, TzRule};

/// Retry cadence while unsynchronized (milliseconds).
const RETRY_INTERVAL_MS: u64 = 15_000;

/// The uptime instant a successful sync was taken at, and what the wall
/// clock read there.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    epoch: i64,
    uptime_ms: u64,
}

/// Outcome of a completed sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncFix {
    /// UTC epoch seconds obtained from the server.
    pub epoch: i64,
    /// False for the first fix after boot, true for drift resyncs.
    pub resync: bool,
}

pub struct ClockSync {
    tz: TzRule,
    servers: heapless::Vec<heapless::String<48>, 3>,
    per_server_timeout_ms: u32,
    resync_interval_ms: u64,
    anchor: Option<Anchor>,
    next_attempt_ms: u64,
}

impl ClockSync {
    pub fn new(config: &DeviceConfig) -> Result<Self, Error> {
        let tz = TzRule::parse(&config.tz_rule).map_err(|_| Error::Config("TZ rule unparseable"))?;

        let mut servers = heapless::Vec::new();
        for s in &config.ntp_servers {
            if !s.is_empty() {
                // Capacity equals the config array size; push cannot fail.
                let _ = servers.push(s.clone());
            }
        }
        if servers.is_empty() {
            return Err(Error::Config("no NTP server configured"));
        }

        Ok(Self {
            tz,
            servers,
            per_server_timeout_ms: config.sntp_timeout_ms,
            resync_interval_ms: u64::from(config.resync_interval_secs) * 1000,
            anchor: None,
            next_attempt_ms: 0,
        })
    }

    /// Whether a first fix has been acquired.
    pub fn is_synced(&self) -> bool {
        self.anchor.is_some()
    }

    /// The parsed timezone rule (shared with the accumulator).
    pub fn tz(&self) -> &TzRule {
        &self.tz
    }

    /// Current UTC epoch seconds, or `TimeError::NotSet` before first sync.
    pub fn utc_now(&self, uptime_ms: u64) -> Result<i64, TimeError> {
        self.epoch_for_uptime(uptime_ms).ok_or(TimeError::NotSet)
    }

    /// Current local wall-clock time per the configured DST rule.
    pub fn now_local(&self, uptime_ms: u64) -> Result<LocalTime, TimeError> {
        let epoch = self.utc_now(uptime_ms)?;
        Ok(self.tz.local_time(epoch))
    }

    /// Map an arbitrary uptime stamp (possibly from before the sync) onto
    /// UTC epoch seconds. `None` until the first fix.
    pub fn epoch_for_uptime(&self, uptime_ms: u64) -> Option<i64> {
        let anchor = self.anchor?;
        let delta_ms = uptime_ms as i64 - anchor.uptime_ms as i64;
        Some(anchor.epoch + delta_ms.div_euclid(1000))
    }

    /// Drive the sync schedule. Returns `None` when no attempt was due,
    /// otherwise the attempt's outcome. Attempts are deferred while the
    /// link is down (the schedule keeps its slot and fires on the first
    /// cycle with connectivity).
    pub fn poll(
        &mut self,
        uptime_ms: u64,
        link_up: bool,
        sntp: &mut impl SntpPort,
    ) -> Option<Result<SyncFix, TimeError>> {
        if uptime_ms < self.next_attempt_ms || !link_up {
            return None;
        }

        let resync = self.anchor.is_some();
        for server in &self.servers {
            match sntp.query(server, self.per_server_timeout_ms) {
                Ok(epoch) => {
                    info!("clock: synced from {} (epoch={}, resync={})", server, epoch, resync);
                    self.anchor = Some(Anchor { epoch, uptime_ms });
                    self.next_attempt_ms = uptime_ms + self.resync_interval_ms;
                    return Some(Ok(SyncFix { epoch, resync }));
                }
                Err(e) => {
                    warn!("clock: {} failed ({}), trying next server", server, e);
                }
            }
        }

        self.next_attempt_ms = uptime_ms + RETRY_INTERVAL_MS;
        warn!("clock: all {} NTP servers failed", self.servers.len());
        Some(Err(TimeError::SyncFailed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::SntpError;

    /// Scripted SNTP mock: pops one scripted reply per query and records
    /// which server was asked.
    struct ScriptedSntp {
        replies: std::vec::Vec<Result<i64, SntpError>>,
        queried: std::vec::Vec<String>,
    }

    impl ScriptedSntp {
        fn new(replies: std::vec::Vec<Result<i64, SntpError>>) -> Self {
            Self {
                replies,
                queried: std::vec::Vec::new(),
            }
        }
    }

    impl SntpPort for ScriptedSntp {
        fn query(&mut self, server: &str, _timeout_ms: u32) -> Result<i64, SntpError> {
            self.queried.push(server.to_string());
            if self.replies.is_empty() {
                Err(SntpError::Timeout)
            } else {
                self.replies.remove(0)
            }
        }
    }

    fn clock() -> ClockSync {
        ClockSync::new(&DeviceConfig::default()).unwrap()
    }

    #[test]
    fn not_set_before_first_sync() {
        let c = clock();
        assert!(!c.is_synced());
        assert_eq!(c.utc_now(5000), Err(TimeError::NotSet));
        assert!(c.now_local(5000).is_err());
    }

    #[test]
    fn first_server_success_anchors_clock() {
        let mut c = clock();
        let mut sntp = ScriptedSntp::new(vec![Ok(1_700_000_000)]);
        let fix = c.poll(10_000, true, &mut sntp).unwrap().unwrap();
        assert_eq!(fix.epoch, 1_700_000_000);
        assert!(!fix.resync);
        assert_eq!(sntp.queried, vec!["pool.ntp.org"]);
        assert_eq!(c.utc_now(10_000), Ok(1_700_000_000));
        assert_eq!(c.utc_now(13_000), Ok(1_700_000_003));
    }

    #[test]
    fn falls_back_through_servers_in_order() {
        let mut c = clock();
        let mut sntp = ScriptedSntp::new(vec![
            Err(SntpError::Timeout),
            Err(SntpError::Unreachable),
            Ok(1_700_000_000),
        ]);
        assert!(c.poll(0, true, &mut sntp).unwrap().is_ok());
        assert_eq!(
            sntp.queried,
            vec!["pool.ntp.org", "time.nist.gov", "time.google.com"]
        );
    }

    #[test]
    fn all_servers_failing_reports_sync_failed() {
        let mut c = clock();
        let mut sntp = ScriptedSntp::new(vec![
            Err(SntpError::Timeout),
            Err(SntpError::Timeout),
            Err(SntpError::BadReply),
        ]);
        assert_eq!(c.poll(0, true, &mut sntp), Some(Err(TimeError::SyncFailed)));
        assert!(!c.is_synced());
        // Not due again until the retry interval has elapsed.
        assert_eq!(c.poll(1000, true, &mut sntp), None);
        assert!(c.poll(RETRY_INTERVAL_MS, true, &mut sntp).is_some());
    }

    #[test]
    fn attempts_deferred_while_link_down() {
        let mut c = clock();
        let mut sntp = ScriptedSntp::new(vec![Ok(1_700_000_000)]);
        assert_eq!(c.poll(0, false, &mut sntp), None);
        assert!(sntp.queried.is_empty());
        // Fires on the first cycle with connectivity.
        assert!(c.poll(50, true, &mut sntp).is_some());
    }

    #[test]
    fn resync_scheduled_at_interval() {
        let mut c = clock();
        let mut sntp = ScriptedSntp::new(vec![Ok(1_700_000_000), Ok(1_700_014_500)]);
        c.poll(0, true, &mut sntp).unwrap().unwrap();

        let interval = u64::from(DeviceConfig::default().resync_interval_secs) * 1000;
        assert_eq!(c.poll(interval - 1, true, &mut sntp), None);

        let fix = c.poll(interval, true, &mut sntp).unwrap().unwrap();
        assert!(fix.resync);
        // Re-anchored: drift corrected (server says 100 s more than the
        // uptime delta implied).
        assert_eq!(c.utc_now(interval), Ok(1_700_014_500));
    }

    #[test]
    fn epoch_for_uptime_maps_pre_sync_stamps() {
        let mut c = clock();
        let mut sntp = ScriptedSntp::new(vec![Ok(1_700_000_000)]);
        c.poll(60_000, true, &mut sntp).unwrap().unwrap();
        // A tip 60 s before the fix lands 60 s earlier on the wall clock.
        assert_eq!(c.epoch_for_uptime(0), Some(1_699_999_940));
    }

    #[test]
    fn local_time_applies_dst_rule() {
        let mut c = clock();
        // 2025-07-15 10:00:00 UTC — CEST in force.
        let epoch = tz::days_from_civil(2025, 7, 15) * 86_400 + 10 * 3600;
        let mut sntp = ScriptedSntp::new(vec![Ok(epoch)]);
        c.poll(0, true, &mut sntp).unwrap().unwrap();
        let lt = c.now_local(0).unwrap();
        assert_eq!(lt.hour, 12);
        assert!(lt.is_dst);
    }
}
