//! Timestamp handling for archive entries and package metadata.
//!
//! This module provides the [`Timestamp`] type, a UTC instant with
//! one-second resolution. It converts between the three representations a
//! package session needs:
//!
//! - zip `DateTime` values (MS-DOS date/time, 2-second precision, years
//!   1980-2107) attached to archive entries
//! - [`SystemTime`], used by [`Stat`](crate::Stat)
//! - ISO-8601 UTC strings (`2024-05-01T12:00:00Z`), used by the
//!   `dcterms:modified` metadata property
//!
//! Zip timestamps carry no zone. They are interpreted as UTC.
//!
//! # Example
//!
//! ```rust
//! use epubfs::Timestamp;
//!
//! let ts = Timestamp::parse_iso8601("2024-05-01T12:30:00Z").unwrap();
//! assert_eq!(ts.to_iso8601(), "2024-05-01T12:30:00Z");
//!
//! let dos = ts.to_zip().unwrap();
//! assert_eq!(dos.year(), 2024);
//! assert_eq!(Timestamp::from_zip(dos), ts);
//! ```

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SECS_PER_DAY: i64 = 86_400;

/// A UTC instant with one-second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Seconds since 1970-01-01T00:00:00Z.
    secs: i64,
}

/// Days since the Unix epoch for a proleptic Gregorian date.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = (if y >= 0 { y } else { y - 399 }) / 400;
    let yoe = y - era * 400;
    let m = month as i64;
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Proleptic Gregorian date for days since the Unix epoch.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}

impl Timestamp {
    /// Creates a timestamp from Unix seconds.
    #[inline]
    pub const fn from_unix_secs(secs: i64) -> Self {
        Self { secs }
    }

    /// Returns the current time, truncated to whole seconds.
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Creates a timestamp from calendar fields, validating each.
    pub fn from_civil(
        year: i64,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
    ) -> Option<Self> {
        if !(1..=12).contains(&month) || hour > 23 || minute > 59 || second > 59 {
            return None;
        }
        let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
        let month_len = match month {
            2 if leap => 29,
            2 => 28,
            4 | 6 | 9 | 11 => 30,
            _ => 31,
        };
        if day == 0 || day > month_len {
            return None;
        }
        let days = days_from_civil(year, month, day);
        Some(Self::from_unix_secs(
            days * SECS_PER_DAY + (hour * 3600 + minute * 60 + second) as i64,
        ))
    }

    /// Creates a timestamp from a `SystemTime`, truncating sub-second
    /// precision toward negative infinity.
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(duration) => Self::from_unix_secs(duration.as_secs() as i64),
            Err(e) => {
                let duration = e.duration();
                let extra = if duration.subsec_nanos() > 0 { 1 } else { 0 };
                Self::from_unix_secs(-(duration.as_secs() as i64) - extra)
            }
        }
    }

    /// Creates a timestamp from a zip entry's modification time.
    pub fn from_zip(dt: zip::DateTime) -> Self {
        // Corrupt archives can carry impossible dates.
        Self::from_civil(
            dt.year() as i64,
            dt.month() as u32,
            dt.day() as u32,
            dt.hour() as u32,
            dt.minute() as u32,
            dt.second() as u32,
        )
        .unwrap_or(Self::DOS_EPOCH)
    }

    /// The earliest time a zip entry can carry (1980-01-01T00:00:00Z).
    pub const DOS_EPOCH: Timestamp = Timestamp::from_unix_secs(315_532_800);

    /// Converts to a zip `DateTime`.
    ///
    /// Returns `None` outside 1980-2107. Odd seconds round down.
    pub fn to_zip(&self) -> Option<zip::DateTime> {
        let (year, month, day, hour, minute, second) = self.civil();
        let year = u16::try_from(year).ok()?;
        zip::DateTime::from_date_and_time(
            year,
            month as u8,
            day as u8,
            hour as u8,
            minute as u8,
            second as u8,
        )
        .ok()
    }

    /// Parses `YYYY-MM-DDTHH:MM:SS` followed by `Z` or nothing.
    ///
    /// Fractional seconds are accepted and discarded.
    pub fn parse_iso8601(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s.strip_suffix('Z').unwrap_or(s);
        let (date, time) = s.split_once('T')?;

        let mut date_parts = date.splitn(3, '-');
        let year = date_parts.next()?.parse().ok()?;
        let month = date_parts.next()?.parse().ok()?;
        let day = date_parts.next()?.parse().ok()?;

        let time = time.split('.').next()?;
        let mut time_parts = time.splitn(3, ':');
        let hour = time_parts.next()?.parse().ok()?;
        let minute = time_parts.next()?.parse().ok()?;
        let second = time_parts.next().map_or(Some(0), |s| s.parse().ok())?;

        Self::from_civil(year, month, day, hour, minute, second)
    }

    /// Formats as `YYYY-MM-DDTHH:MM:SSZ`.
    pub fn to_iso8601(&self) -> String {
        let (year, month, day, hour, minute, second) = self.civil();
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
            year, month, day, hour, minute, second
        )
    }

    /// Returns the timestamp as Unix seconds.
    #[inline]
    pub const fn as_unix_secs(&self) -> i64 {
        self.secs
    }

    /// Converts to a `SystemTime`.
    pub fn as_system_time(&self) -> SystemTime {
        if self.secs >= 0 {
            UNIX_EPOCH + Duration::from_secs(self.secs as u64)
        } else {
            UNIX_EPOCH - Duration::from_secs(self.secs.unsigned_abs())
        }
    }

    fn civil(&self) -> (i64, u32, u32, u32, u32, u32) {
        let days = self.secs.div_euclid(SECS_PER_DAY);
        let rem = self.secs.rem_euclid(SECS_PER_DAY) as u32;
        let (year, month, day) = civil_from_days(days);
        (year, month, day, rem / 3600, rem % 3600 / 60, rem % 60)
    }
}

impl Default for Timestamp {
    /// Returns the DOS epoch, the zip default.
    fn default() -> Self {
        Self::DOS_EPOCH
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        Self::from_system_time(time)
    }
}

impl From<Timestamp> for SystemTime {
    fn from(ts: Timestamp) -> SystemTime {
        ts.as_system_time()
    }
}
