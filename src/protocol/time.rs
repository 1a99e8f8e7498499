// ABOUTME: NTP time tag utilities
// ABOUTME: Wall clock to 64-bit NTP conversion, offsets and human-readable dates

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970)
pub const NTP_UNIX_OFFSET: u64 = 0x83AA_7E80;

/// Time tag meaning "dispatch immediately"
pub const IMMEDIATE: u64 = 1;

const MICROS_PER_SEC: i64 = 1_000_000;

/// Current wall clock plus `offset_millis` as an NTP time tag.
///
/// The high 32 bits hold seconds since 1900; the low 32 bits hold the
/// microseconds within that second (not a binary fraction).
pub fn current_ntp_time(offset_millis: i64) -> u64 {
    let offset = Duration::from_millis(offset_millis.unsigned_abs());
    let now = SystemTime::now();
    let shifted = if offset_millis >= 0 {
        now.checked_add(offset)
    } else {
        now.checked_sub(offset)
    }
    .unwrap_or(now);
    let since_epoch = shifted.duration_since(UNIX_EPOCH).unwrap_or_default();

    let secs = since_epoch.as_secs() + NTP_UNIX_OFFSET;
    (secs << 32) + u64::from(since_epoch.subsec_micros())
}

/// Shift an NTP time tag by a seconds/microseconds offset, carrying
/// microseconds into seconds in either direction.
pub fn apply_offset(ntp_time: u64, offset_secs: i64, offset_usecs: i64) -> u64 {
    let mut secs = (ntp_time >> 32) as i64 + offset_secs;
    let usecs = (ntp_time & 0xFFFF_FFFF) as i64 + offset_usecs;
    secs += usecs.div_euclid(MICROS_PER_SEC);
    let usecs = usecs.rem_euclid(MICROS_PER_SEC);
    ((secs as u64) << 32) + usecs as u64
}

/// Presentation time: now plus `offset_future_millis`, corrected by a local
/// offset to the system clock (see [`offset_from_system`]).
pub fn future_clock_with_offset(
    offset_future_millis: i64,
    local_offset_secs: i64,
    local_offset_usecs: i64,
) -> u64 {
    apply_offset(
        current_ntp_time(offset_future_millis),
        local_offset_secs,
        local_offset_usecs,
    )
}

/// Offset `(seconds, microseconds)` from the system clock to `ntp_time`
pub fn offset_from_system(ntp_time: u64) -> (i64, i64) {
    let now = current_ntp_time(0);
    let secs = (ntp_time >> 32) as i64 - (now >> 32) as i64;
    let usecs = (ntp_time & 0xFFFF_FFFF) as i64 - (now & 0xFFFF_FFFF) as i64;
    (secs, usecs)
}

/// Calendar breakdown of an NTP time tag (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpDate {
    /// Year, e.g. 2024
    pub year: i64,
    /// Month, 1-12
    pub month: u32,
    /// Day of month, 1-31
    pub day: u32,
    /// Hours, 0-23
    pub hours: u32,
    /// Minutes, 0-59
    pub minutes: u32,
    /// Seconds, 0-59
    pub seconds: u32,
}

/// Convert an NTP time tag to a UTC calendar date
pub fn date_from_ntp(ntp_time: u64) -> NtpDate {
    let unix_secs = (ntp_time >> 32) as i64 - NTP_UNIX_OFFSET as i64;
    let days = unix_secs.div_euclid(86_400);
    let of_day = unix_secs.rem_euclid(86_400) as u32;
    let (year, month, day) = civil_from_days(days);
    NtpDate {
        year,
        month,
        day,
        hours: of_day / 3600,
        minutes: of_day % 3600 / 60,
        seconds: of_day % 60,
    }
}

/// `HH:MM:SS`, or `M/D/YYYY HH:MM:SS` with `include_date`
pub fn clock_string(ntp_time: u64, include_date: bool) -> String {
    let d = date_from_ntp(ntp_time);
    if include_date {
        format!(
            "{}/{}/{} {:02}:{:02}:{:02}",
            d.month, d.day, d.year, d.hours, d.minutes, d.seconds
        )
    } else {
        format!("{:02}:{:02}:{:02}", d.hours, d.minutes, d.seconds)
    }
}

// Days since 1970-01-01 to (year, month, day) in the proleptic Gregorian calendar.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// Presentation clock tracking a fixed offset from the local system clock.
///
/// Set it from a reference time tag (e.g. received from a master clock) and
/// read corrected time tags from it afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresentationClock {
    offset_secs: i64,
    offset_usecs: i64,
}

impl PresentationClock {
    /// Clock with no offset from the system clock
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock whose "now" equals `reference` at the moment of the call
    pub fn from_reference(reference: u64) -> Self {
        let (offset_secs, offset_usecs) = offset_from_system(reference);
        Self {
            offset_secs,
            offset_usecs,
        }
    }

    /// Offset to the system clock as `(seconds, microseconds)`
    pub fn offset(&self) -> (i64, i64) {
        (self.offset_secs, self.offset_usecs)
    }

    /// Corrected time tag `offset_future_millis` from now
    pub fn now(&self, offset_future_millis: i64) -> u64 {
        future_clock_with_offset(offset_future_millis, self.offset_secs, self.offset_usecs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ntp(unix_secs: u64, usecs: u64) -> u64 {
        ((unix_secs + NTP_UNIX_OFFSET) << 32) + usecs
    }

    #[test]
    fn test_current_time_layout() {
        let t = current_ntp_time(0);
        // after 2020-01-01
        assert!((t >> 32) > 1_577_836_800 + NTP_UNIX_OFFSET);
        assert!((t & 0xFFFF_FFFF) < 1_000_000);
    }

    #[test]
    fn test_offset_moves_clock() {
        let now = current_ntp_time(0) >> 32;
        let later = current_ntp_time(10_000) >> 32;
        let earlier = current_ntp_time(-10_000) >> 32;
        assert!(later >= now + 9);
        assert!(earlier + 9 <= now);
    }

    #[test]
    fn test_apply_offset_carries() {
        let base = ntp(100, 900_000);
        assert_eq!(apply_offset(base, 0, 200_000), ntp(101, 100_000));
        assert_eq!(apply_offset(base, 1, -950_000), ntp(100, 950_000));
        assert_eq!(apply_offset(base, -2, 0), ntp(98, 900_000));
    }

    #[test]
    fn test_dates() {
        assert_eq!(
            date_from_ntp(ntp(0, 0)),
            NtpDate {
                year: 1970,
                month: 1,
                day: 1,
                hours: 0,
                minutes: 0,
                seconds: 0
            }
        );
        let d = date_from_ntp(ntp(1_700_000_000, 0));
        assert_eq!((d.year, d.month, d.day), (2023, 11, 14));
        assert_eq!(clock_string(ntp(1_700_000_000, 0), false), "22:13:20");
        assert_eq!(clock_string(ntp(1_700_000_000, 0), true), "11/14/2023 22:13:20");
        // leap day
        let d = date_from_ntp(ntp(951_782_400, 0));
        assert_eq!((d.year, d.month, d.day), (2000, 2, 29));
    }

    #[test]
    fn test_presentation_clock() {
        let reference = current_ntp_time(60_000);
        let clock = PresentationClock::from_reference(reference);
        let (secs, _) = clock.offset();
        assert!((59..=61).contains(&secs));
        let corrected = clock.now(0) >> 32;
        assert!(corrected.abs_diff(reference >> 32) <= 1);
    }
}
