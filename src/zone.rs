use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, Timelike, Utc};

use crate::model::{DayOfWeek, InvalidValue, MinuteOfDay, Ms, MINUTE_MS};

/// Where an instant falls on the local calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalInstant {
    pub date: NaiveDate,
    pub day: DayOfWeek,
    pub clock: MinuteOfDay,
}

/// The institution's time zone, as a fixed UTC offset.
///
/// Instants are stored as UTC milliseconds; weekday, wall-clock time and
/// calendar date are always derived through this policy, never through the
/// process environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZonePolicy {
    offset: FixedOffset,
}

impl Default for ZonePolicy {
    fn default() -> Self {
        Self::utc()
    }
}

impl ZonePolicy {
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    pub fn fixed(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Accepts `Z`, `UTC`, or `±HH:MM`.
    pub fn parse(s: &str) -> Result<Self, InvalidValue> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
            return Ok(Self::utc());
        }
        let (sign, rest) = match s.as_bytes().first() {
            Some(b'+') => (1, &s[1..]),
            Some(b'-') => (-1, &s[1..]),
            _ => return Err(InvalidValue("utc offset must be Z, UTC or ±HH:MM")),
        };
        let magnitude: MinuteOfDay = rest
            .parse()
            .map_err(|_| InvalidValue("utc offset must be Z, UTC or ±HH:MM"))?;
        if magnitude.minutes() > 18 * 60 {
            return Err(InvalidValue("utc offset beyond ±18:00"));
        }
        let seconds = sign * i32::from(magnitude.minutes()) * 60;
        FixedOffset::east_opt(seconds)
            .map(Self::fixed)
            .ok_or(InvalidValue("utc offset out of range"))
    }

    /// `None` when the instant is outside chrono's representable range.
    pub fn localize(&self, at: Ms) -> Option<LocalInstant> {
        let local = DateTime::<Utc>::from_timestamp_millis(at)?.with_timezone(&self.offset);
        let clock = MinuteOfDay::from_hm(local.hour() as u16, local.minute() as u16).ok()?;
        Some(LocalInstant {
            date: local.date_naive(),
            day: DayOfWeek::from_weekday(local.weekday()),
            clock,
        })
    }

    /// The instant at which `date` shows `clock` on the local wall.
    pub fn instant_of(&self, date: NaiveDate, clock: MinuteOfDay) -> Option<Ms> {
        let midnight = date
            .and_hms_opt(0, 0, 0)?
            .and_local_timezone(self.offset)
            .single()?;
        Some(midnight.timestamp_millis() + Ms::from(clock.minutes()) * MINUTE_MS)
    }
}
