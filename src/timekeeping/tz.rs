//! POSIX timezone rule evaluation.
//!
//! The node's timezone is configured as a POSIX TZ string such as
//! `CET-1CEST,M3.5.0/2,M10.5.0/3` (the deployment rule for
//! Europe/Bratislava). This module parses the `STD offset DST[offset],
//! start[/time],end[/time]` form with `Mm.w.d` transition dates and answers
//! the one question the accumulator cares about: *what is the UTC offset at
//! this instant?*
//!
//! Only the `M` (month.week.weekday) date form is supported — it is the only
//! form the deployment fleet uses, and the only one that stays correct
//! across years without a tz database.
//!
//! Calendar math follows the well-known days-from-civil algorithm, so no
//! chrono/tz crate is pulled into the firmware image.

use core::fmt;

/// Seconds per hour/day, used throughout the transition math.
const SECS_PER_HOUR: i64 = 3600;
const SECS_PER_DAY: i64 = 86_400;

/// Default transition time when the rule omits `/time` (POSIX: 02:00:00).
const DEFAULT_TRANSITION_SECS: i32 = 2 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TzParseError {
    /// The string is empty or truncated mid-field.
    Truncated,
    /// Zone abbreviation shorter than 3 letters or containing digits.
    BadAbbreviation,
    /// Offset field is not `[+|-]h[h][:mm[:ss]]` or out of range (>24 h).
    BadOffset,
    /// Transition rule is not in `Mm.w.d` form or a field is out of range.
    BadTransition,
    /// A DST zone was named but the two transition rules are missing.
    MissingTransitions,
}

impl fmt::Display for TzParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "TZ string truncated"),
            Self::BadAbbreviation => write!(f, "bad zone abbreviation"),
            Self::BadOffset => write!(f, "bad UTC offset"),
            Self::BadTransition => write!(f, "bad Mm.w.d transition rule"),
            Self::MissingTransitions => write!(f, "DST named but transitions missing"),
        }
    }
}

/// One `Mm.w.d[/time]` transition rule.
///
/// `week == 5` means "last occurrence of `weekday` in `month`" per POSIX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    /// Month 1–12.
    pub month: u8,
    /// Week-of-month 1–5 (5 = last).
    pub week: u8,
    /// Day-of-week 0–6, 0 = Sunday.
    pub weekday: u8,
    /// Local wall-clock time of the switch, seconds after midnight.
    pub time_secs: i32,
}

impl TransitionRule {
    /// Resolve the rule to a day-of-month for the given year.
    fn day_of_month(&self, year: i32) -> u8 {
        let first_wd = weekday_from_days(days_from_civil(year, self.month, 1));
        let offset = (i32::from(self.weekday) - i32::from(first_wd)).rem_euclid(7);
        let mut day = 1 + offset + (i32::from(self.week) - 1) * 7;
        while day > i32::from(days_in_month(year, self.month)) {
            day -= 7;
        }
        day as u8
    }

    /// UTC instant of the transition in `year`, given the UTC offset in
    /// force immediately *before* the switch (POSIX interprets the rule
    /// time as local wall-clock time).
    fn utc_instant(&self, year: i32, offset_before: i32) -> i64 {
        let day = self.day_of_month(year);
        days_from_civil(year, self.month, day) * SECS_PER_DAY + i64::from(self.time_secs)
            - i64::from(offset_before)
    }
}

/// A parsed POSIX TZ rule.
///
/// Offsets are stored as seconds *east* of UTC (CET = +3600), i.e. negated
/// from the POSIX string where `CET-1` means "add -1 h to local to reach
/// UTC".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TzRule {
    std_abbr: heapless::String<8>,
    dst_abbr: Option<heapless::String<8>>,
    std_offset_secs: i32,
    dst_offset_secs: i32,
    dst_start: Option<TransitionRule>,
    dst_end: Option<TransitionRule>,
}

impl TzRule {
    /// Parse a POSIX TZ string, e.g. `CET-1CEST,M3.5.0/2,M10.5.0/3`.
    pub fn parse(s: &str) -> Result<Self, TzParseError> {
        let mut cur = Cursor::new(s);

        let std_abbr = cur.take_abbr()?;
        let std_posix = cur.take_offset()?;
        let std_offset_secs = -std_posix;

        // Optional DST zone name, optional explicit offset (default: one
        // hour ahead of standard time).
        let dst_abbr = cur.try_take_abbr();
        let (dst_offset_secs, dst_start, dst_end) = if dst_abbr.is_some() {
            let dst_offset_secs = match cur.try_take_offset()? {
                Some(posix) => -posix,
                None => std_offset_secs + SECS_PER_HOUR as i32,
            };
            cur.expect(b',').map_err(|_| TzParseError::MissingTransitions)?;
            let start = cur.take_transition()?;
            cur.expect(b',').map_err(|_| TzParseError::MissingTransitions)?;
            let end = cur.take_transition()?;
            (dst_offset_secs, Some(start), Some(end))
        } else {
            (std_offset_secs, None, None)
        };

        if !cur.at_end() {
            return Err(TzParseError::BadTransition);
        }

        Ok(Self {
            std_abbr,
            dst_abbr,
            std_offset_secs,
            dst_offset_secs,
            dst_start,
            dst_end,
        })
    }

    /// Standard-time offset, seconds east of UTC.
    pub fn std_offset(&self) -> i32 {
        self.std_offset_secs
    }

    /// DST offset, seconds east of UTC (equals [`std_offset`](Self::std_offset)
    /// for zones without DST).
    pub fn dst_offset(&self) -> i32 {
        self.dst_offset_secs
    }

    /// Whether DST is in force at the given UTC instant.
    pub fn is_dst(&self, utc_epoch: i64) -> bool {
        let (Some(start), Some(end)) = (self.dst_start, self.dst_end) else {
            return false;
        };

        let year = civil_from_days(utc_epoch.div_euclid(SECS_PER_DAY)).0;
        // The start rule's wall time is standard time; the end rule's wall
        // time is DST time.
        let start_utc = start.utc_instant(year, self.std_offset_secs);
        let end_utc = end.utc_instant(year, self.dst_offset_secs);

        if start_utc <= end_utc {
            // Northern hemisphere: DST between start and end.
            utc_epoch >= start_utc && utc_epoch < end_utc
        } else {
            // Southern hemisphere: DST wraps the new year.
            utc_epoch >= start_utc || utc_epoch < end_utc
        }
    }

    /// UTC offset (seconds east) in force at the given UTC instant.
    pub fn utc_offset(&self, utc_epoch: i64) -> i32 {
        if self.is_dst(utc_epoch) {
            self.dst_offset_secs
        } else {
            self.std_offset_secs
        }
    }

    /// Zone abbreviation in force at the given UTC instant.
    pub fn abbreviation(&self, utc_epoch: i64) -> &str {
        if self.is_dst(utc_epoch) {
            self.dst_abbr.as_deref().unwrap_or(&self.std_abbr)
        } else {
            &self.std_abbr
        }
    }

    /// Broken-down local time for the given UTC instant.
    pub fn local_time(&self, utc_epoch: i64) -> LocalTime {
        let is_dst = self.is_dst(utc_epoch);
        let offset = if is_dst {
            self.dst_offset_secs
        } else {
            self.std_offset_secs
        };
        let local_secs = utc_epoch + i64::from(offset);
        let days = local_secs.div_euclid(SECS_PER_DAY);
        let tod = local_secs.rem_euclid(SECS_PER_DAY);
        let (year, month, day) = civil_from_days(days);
        LocalTime {
            year,
            month,
            day,
            hour: (tod / 3600) as u8,
            minute: (tod % 3600 / 60) as u8,
            second: (tod % 60) as u8,
            weekday: weekday_from_days(days),
            utc_offset_secs: offset,
            is_dst,
            utc_epoch,
        }
    }
}

/// Broken-down local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    pub year: i32,
    /// 1–12.
    pub month: u8,
    /// 1–31.
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// 0–6, 0 = Sunday.
    pub weekday: u8,
    /// Seconds east of UTC in force at this instant.
    pub utc_offset_secs: i32,
    pub is_dst: bool,
    /// The UTC instant this local time was derived from.
    pub utc_epoch: i64,
}

impl fmt::Display for LocalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}{}",
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            if self.is_dst { " DST" } else { "" }
        )
    }
}

// ───────────────────────────────────────────────────────────────
// Civil calendar math (proleptic Gregorian)
// ───────────────────────────────────────────────────────────────

/// Days since 1970-01-01 for a civil date.
pub fn days_from_civil(year: i32, month: u8, day: u8) -> i64 {
    let y = i64::from(year) - i64::from(month <= 2);
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400; // 0..=399
    let m = i64::from(month);
    let doy = (153 * (m + if m > 2 { -3 } else { 9 }) + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Civil date for days since 1970-01-01.
pub fn civil_from_days(z: i64) -> (i32, u8, u8) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097; // 0..=146096
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    ((y + i64::from(month <= 2)) as i32, month, day)
}

/// Day-of-week for days since 1970-01-01; 0 = Sunday.
/// (1970-01-01 was a Thursday.)
pub fn weekday_from_days(z: i64) -> u8 {
    (z + 4).rem_euclid(7) as u8
}

fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

fn days_in_month(year: i32, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

// ───────────────────────────────────────────────────────────────
// Parsing
// ───────────────────────────────────────────────────────────────

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(s: &'a str) -> Self {
        Self {
            bytes: s.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn expect(&mut self, b: u8) -> Result<(), TzParseError> {
        if self.peek() == Some(b) {
            self.pos += 1;
            Ok(())
        } else {
            Err(TzParseError::Truncated)
        }
    }

    /// Zone abbreviation: 3+ ASCII letters.
    fn take_abbr(&mut self) -> Result<heapless::String<8>, TzParseError> {
        self.try_take_abbr().ok_or(TzParseError::BadAbbreviation)
    }

    fn try_take_abbr(&mut self) -> Option<heapless::String<8>> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        let len = self.pos - start;
        if len < 3 || len > 8 {
            self.pos = start;
            return None;
        }
        let mut abbr = heapless::String::new();
        for &b in &self.bytes[start..self.pos] {
            abbr.push(b as char).ok()?;
        }
        Some(abbr)
    }

    /// POSIX offset `[+|-]h[h][:mm[:ss]]` in seconds (sign as written).
    fn take_offset(&mut self) -> Result<i32, TzParseError> {
        self.try_take_offset()?.ok_or(TzParseError::BadOffset)
    }

    fn try_take_offset(&mut self) -> Result<Option<i32>, TzParseError> {
        let sign = match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                -1
            }
            Some(b'+') => {
                self.pos += 1;
                1
            }
            Some(b) if b.is_ascii_digit() => 1,
            _ => return Ok(None),
        };

        let hours = self.take_number(2).ok_or(TzParseError::BadOffset)?;
        if hours > 24 {
            return Err(TzParseError::BadOffset);
        }
        let mut secs = hours * 3600;
        for unit in [60, 1] {
            if self.peek() == Some(b':') {
                self.pos += 1;
                let v = self.take_number(2).ok_or(TzParseError::BadOffset)?;
                if v > 59 {
                    return Err(TzParseError::BadOffset);
                }
                secs += v * unit;
            } else {
                break;
            }
        }
        Ok(Some(sign * secs))
    }

    /// `Mm.w.d[/time]` transition rule.
    fn take_transition(&mut self) -> Result<TransitionRule, TzParseError> {
        self.expect(b'M').map_err(|_| TzParseError::BadTransition)?;
        let month = self.take_number(2).ok_or(TzParseError::BadTransition)?;
        self.expect(b'.').map_err(|_| TzParseError::BadTransition)?;
        let week = self.take_number(1).ok_or(TzParseError::BadTransition)?;
        self.expect(b'.').map_err(|_| TzParseError::BadTransition)?;
        let weekday = self.take_number(1).ok_or(TzParseError::BadTransition)?;

        if !(1..=12).contains(&month) || !(1..=5).contains(&week) || weekday > 6 {
            return Err(TzParseError::BadTransition);
        }

        let time_secs = if self.peek() == Some(b'/') {
            self.pos += 1;
            // POSIX allows -167..=167 hours here; the sign matters for
            // rules like Ireland's. Hours outside 0..=23 are accepted.
            let sign = if self.peek() == Some(b'-') {
                self.pos += 1;
                -1
            } else {
                1
            };
            let hours = self.take_number(3).ok_or(TzParseError::BadTransition)?;
            let mut secs = hours * 3600;
            for unit in [60, 1] {
                if self.peek() == Some(b':') {
                    self.pos += 1;
                    let v = self.take_number(2).ok_or(TzParseError::BadTransition)?;
                    if v > 59 {
                        return Err(TzParseError::BadTransition);
                    }
                    secs += v * unit;
                } else {
                    break;
                }
            }
            sign * secs
        } else {
            DEFAULT_TRANSITION_SECS
        };

        Ok(TransitionRule {
            month: month as u8,
            week: week as u8,
            weekday: weekday as u8,
            time_secs,
        })
    }

    /// Up to `max_digits` decimal digits.
    fn take_number(&mut self, max_digits: usize) -> Option<i32> {
        let start = self.pos;
        while self.pos - start < max_digits
            && matches!(self.peek(), Some(b) if b.is_ascii_digit())
        {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        let mut v: i32 = 0;
        for &b in &self.bytes[start..self.pos] {
            v = v * 10 + i32::from(b - b'0');
        }
        Some(v)
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const CET: &str = "CET-1CEST,M3.5.0/2,M10.5.0/3";

    fn utc(y: i32, mo: u8, d: u8, h: u8, mi: u8, s: u8) -> i64 {
        days_from_civil(y, mo, d) * 86_400
            + i64::from(h) * 3600
            + i64::from(mi) * 60
            + i64::from(s)
    }

    #[test]
    fn civil_roundtrip_epoch() {
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(weekday_from_days(0), 4); // Thursday
    }

    #[test]
    fn civil_roundtrip_range() {
        for z in (-200_000..200_000).step_by(373) {
            let (y, m, d) = civil_from_days(z);
            assert_eq!(days_from_civil(y, m, d), z);
        }
    }

    #[test]
    fn parses_cet_rule() {
        let tz = TzRule::parse(CET).unwrap();
        assert_eq!(tz.std_offset_secs, 3600);
        assert_eq!(tz.dst_offset_secs, 7200);
        assert_eq!(
            tz.dst_start,
            Some(TransitionRule {
                month: 3,
                week: 5,
                weekday: 0,
                time_secs: 7200
            })
        );
        assert_eq!(
            tz.dst_end,
            Some(TransitionRule {
                month: 10,
                week: 5,
                weekday: 0,
                time_secs: 10_800
            })
        );
    }

    #[test]
    fn parses_us_eastern() {
        let tz = TzRule::parse("EST5EDT,M3.2.0/2,M11.1.0/2").unwrap();
        assert_eq!(tz.std_offset_secs, -5 * 3600);
        assert_eq!(tz.dst_offset_secs, -4 * 3600);
    }

    #[test]
    fn parses_fixed_offset_zone() {
        let tz = TzRule::parse("UTC0").unwrap();
        assert_eq!(tz.utc_offset(0), 0);
        assert!(!tz.is_dst(utc(2025, 7, 1, 12, 0, 0)));

        let tz = TzRule::parse("IST-5:30").unwrap();
        assert_eq!(tz.utc_offset(0), 5 * 3600 + 1800);
    }

    #[test]
    fn rejects_malformed_rules() {
        assert!(TzRule::parse("").is_err());
        assert!(TzRule::parse("CE-1").is_err());
        assert!(TzRule::parse("CET").is_err());
        assert!(TzRule::parse("CET-1CEST").is_err());
        assert!(TzRule::parse("CET-1CEST,M3.5.0").is_err());
        assert!(TzRule::parse("CET-1CEST,M13.5.0/2,M10.5.0/3").is_err());
        assert!(TzRule::parse("CET-1CEST,M3.5.7/2,M10.5.0/3").is_err());
        assert!(TzRule::parse("CET-25CEST,M3.5.0/2,M10.5.0/3").is_err());
    }

    #[test]
    fn last_sunday_resolution() {
        // 2025: last Sunday of March is the 30th, of October the 26th.
        let tz = TzRule::parse(CET).unwrap();
        let start = tz.dst_start.unwrap();
        let end = tz.dst_end.unwrap();
        assert_eq!(start.day_of_month(2025), 30);
        assert_eq!(end.day_of_month(2025), 26);
        // 2026: March 29th, October 25th.
        assert_eq!(start.day_of_month(2026), 29);
        assert_eq!(end.day_of_month(2026), 25);
    }

    #[test]
    fn cet_spring_forward_instant() {
        let tz = TzRule::parse(CET).unwrap();
        // 2025-03-30 02:00 CET = 01:00 UTC — clocks jump to 03:00 CEST.
        let switch = utc(2025, 3, 30, 1, 0, 0);
        assert!(!tz.is_dst(switch - 1));
        assert!(tz.is_dst(switch));
        assert_eq!(tz.utc_offset(switch - 1), 3600);
        assert_eq!(tz.utc_offset(switch), 7200);

        let before = tz.local_time(switch - 1);
        let after = tz.local_time(switch);
        assert_eq!((before.hour, before.minute, before.second), (1, 59, 59));
        assert_eq!((after.hour, after.minute, after.second), (3, 0, 0));
    }

    #[test]
    fn cet_fall_back_instant() {
        let tz = TzRule::parse(CET).unwrap();
        // 2025-10-26 03:00 CEST = 01:00 UTC — clocks fall back to 02:00 CET.
        let switch = utc(2025, 10, 26, 1, 0, 0);
        assert!(tz.is_dst(switch - 1));
        assert!(!tz.is_dst(switch));

        let before = tz.local_time(switch - 1);
        let after = tz.local_time(switch);
        assert_eq!((before.hour, before.minute), (2, 59));
        assert_eq!((after.hour, after.minute), (2, 0));
    }

    #[test]
    fn southern_hemisphere_wraps_new_year() {
        // New Zealand: DST from late September to early April.
        let tz = TzRule::parse("NZST-12NZDT,M9.5.0,M4.1.0/3").unwrap();
        assert!(tz.is_dst(utc(2025, 1, 15, 0, 0, 0)));
        assert!(!tz.is_dst(utc(2025, 6, 15, 0, 0, 0)));
        assert!(tz.is_dst(utc(2025, 12, 15, 0, 0, 0)));
    }

    #[test]
    fn abbreviation_tracks_dst() {
        let tz = TzRule::parse(CET).unwrap();
        assert_eq!(tz.abbreviation(utc(2025, 1, 15, 12, 0, 0)), "CET");
        assert_eq!(tz.abbreviation(utc(2025, 7, 15, 12, 0, 0)), "CEST");
    }

    #[test]
    fn local_time_display() {
        let tz = TzRule::parse(CET).unwrap();
        let lt = tz.local_time(utc(2025, 7, 4, 10, 30, 0));
        assert_eq!(lt.to_string(), "2025-07-04 12:30:00 DST");
    }
}
