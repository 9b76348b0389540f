use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC. The only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// A value that failed a format or range check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidValue(pub &'static str);

impl fmt::Display for InvalidValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for InvalidValue {}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `[start, start + minutes)`.
    pub fn starting_at(start: Ms, minutes: u16) -> Self {
        Self::new(start, start + Ms::from(minutes) * MINUTE_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Calendar primitives ──────────────────────────────────────────

/// Day of the week, `0 = Sunday` through `6 = Saturday`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DayOfWeek(u8);

impl DayOfWeek {
    pub const SUNDAY: DayOfWeek = DayOfWeek(0);
    pub const MONDAY: DayOfWeek = DayOfWeek(1);
    pub const TUESDAY: DayOfWeek = DayOfWeek(2);
    pub const WEDNESDAY: DayOfWeek = DayOfWeek(3);
    pub const THURSDAY: DayOfWeek = DayOfWeek(4);
    pub const FRIDAY: DayOfWeek = DayOfWeek(5);
    pub const SATURDAY: DayOfWeek = DayOfWeek(6);

    const NAMES: [&'static str; 7] = [
        "Sunday",
        "Monday",
        "Tuesday",
        "Wednesday",
        "Thursday",
        "Friday",
        "Saturday",
    ];

    pub fn new(index: u8) -> Result<Self, InvalidValue> {
        if index < 7 {
            Ok(Self(index))
        } else {
            Err(InvalidValue("day of week must be 0 (Sunday) through 6 (Saturday)"))
        }
    }

    pub fn from_weekday(weekday: chrono::Weekday) -> Self {
        // num_days_from_sunday is always < 7
        Self(weekday.num_days_from_sunday() as u8)
    }

    pub fn name(self) -> &'static str {
        Self::NAMES[self.0 as usize]
    }
}

impl TryFrom<u8> for DayOfWeek {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DayOfWeek> for u8 {
    fn from(day: DayOfWeek) -> Self {
        day.0
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Wall-clock time as minutes since local midnight. `24:00` is allowed as an
/// end bound; times derived from an instant are always below it.
///
/// Serialized as zero-padded `"HH:MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MinuteOfDay(u16);

impl MinuteOfDay {
    pub const MIDNIGHT: MinuteOfDay = MinuteOfDay(0);
    pub const END_OF_DAY: MinuteOfDay = MinuteOfDay(MINUTES_PER_DAY);

    pub fn new(minutes: u16) -> Result<Self, InvalidValue> {
        if minutes <= MINUTES_PER_DAY {
            Ok(Self(minutes))
        } else {
            Err(InvalidValue("time of day past 24:00"))
        }
    }

    pub fn from_hm(hour: u16, minute: u16) -> Result<Self, InvalidValue> {
        if minute >= 60 {
            return Err(InvalidValue("minute must be below 60"));
        }
        Self::new(hour * 60 + minute)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u16 {
        self.0 / 60
    }

    pub fn minute(self) -> u16 {
        self.0 % 60
    }

    pub fn checked_add(self, minutes: u16) -> Option<Self> {
        self.0.checked_add(minutes).and_then(|m| Self::new(m).ok())
    }
}

impl FromStr for MinuteOfDay {
    type Err = InvalidValue;

    /// Strict `HH:MM`: exactly two digits, a colon, two digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const MALFORMED: InvalidValue = InvalidValue("time must be zero-padded HH:MM");
        let bytes = s.as_bytes();
        if bytes.len() != 5 || bytes[2] != b':' {
            return Err(MALFORMED);
        }
        let digit = |b: u8| {
            if b.is_ascii_digit() {
                Ok(u16::from(b - b'0'))
            } else {
                Err(MALFORMED)
            }
        };
        let hour = digit(bytes[0])? * 10 + digit(bytes[1])?;
        let minute = digit(bytes[3])? * 10 + digit(bytes[4])?;
        Self::from_hm(hour, minute)
    }
}

impl TryFrom<String> for MinuteOfDay {
    type Error = InvalidValue;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MinuteOfDay> for String {
    fn from(m: MinuteOfDay) -> Self {
        m.to_string()
    }
}

impl fmt::Display for MinuteOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Daily opening hours `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DailyHours {
    pub start: MinuteOfDay,
    pub end: MinuteOfDay,
}

impl DailyHours {
    pub fn new(start: MinuteOfDay, end: MinuteOfDay) -> Result<Self, InvalidValue> {
        if start < end {
            Ok(Self { start, end })
        } else {
            Err(InvalidValue("end time must be after start time"))
        }
    }

    pub fn contains(&self, t: MinuteOfDay) -> bool {
        self.start <= t && t < self.end
    }
}

impl fmt::Display for DailyHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

// ── Availability ─────────────────────────────────────────────────

/// A teacher's recurring weekly offer of bookable time for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Ulid,
    pub teacher_id: Ulid,
    pub subject_id: Ulid,
    pub day: DayOfWeek,
    pub hours: DailyHours,
    /// Length of one bookable slot.
    pub slot_minutes: u16,
    pub max_bookings: u32,
    pub valid_from: NaiveDate,
    /// `None` means open-ended.
    pub valid_until: Option<NaiveDate>,
}

impl AvailabilityWindow {
    /// Only `valid_until` bounds the lookup; `valid_from` is informational.
    pub fn in_effect_on(&self, date: NaiveDate) -> bool {
        self.valid_until.is_none_or(|until| until >= date)
    }

    /// Same (teacher, subject, day, start, end) tuple.
    pub fn same_slot_as(&self, other: &AvailabilityWindow) -> bool {
        self.teacher_id == other.teacher_id
            && self.subject_id == other.subject_id
            && self.day == other.day
            && self.hours == other.hours
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWindow {
    pub teacher_id: Ulid,
    pub subject_id: Ulid,
    pub day: DayOfWeek,
    pub hours: DailyHours,
    #[serde(default)]
    pub slot_minutes: Option<u16>,
    #[serde(default)]
    pub max_bookings: Option<u32>,
    pub valid_from: NaiveDate,
    #[serde(default)]
    pub valid_until: Option<NaiveDate>,
}

/// Partial update of a window. `open_ended` clears `valid_until`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPatch {
    #[serde(default)]
    pub hours: Option<DailyHours>,
    #[serde(default)]
    pub slot_minutes: Option<u16>,
    #[serde(default)]
    pub valid_from: Option<NaiveDate>,
    #[serde(default)]
    pub valid_until: Option<NaiveDate>,
    #[serde(default)]
    pub open_ended: bool,
}

/// A bookable sub-interval of a window on a concrete date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSlot {
    pub window_id: Ulid,
    pub start: Ms,
    pub end: Ms,
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Canceled,
}

impl AppointmentStatus {
    /// Statuses that occupy the teacher's time.
    pub const ACTIVE: [AppointmentStatus; 3] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Completed,
    ];

    pub fn is_active(self) -> bool {
        !matches!(self, AppointmentStatus::Canceled)
    }

    pub fn can_become(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Canceled) | (Confirmed, Completed) | (Confirmed, Canceled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub student_id: Ulid,
    pub teacher_id: Ulid,
    pub subject_id: Ulid,
    pub at: Ms,
    /// Slot length of the window that accepted the booking.
    pub slot_minutes: u16,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub feedback: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: Ms,
    pub confirmed_at: Option<Ms>,
    pub completed_at: Option<Ms>,
    pub canceled_at: Option<Ms>,
}

impl Appointment {
    pub fn span(&self) -> Span {
        Span::starting_at(self.at, self.slot_minutes)
    }

    pub fn is_participant(&self, user_id: Ulid) -> bool {
        self.student_id == user_id || self.teacher_id == user_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub student_id: Ulid,
    pub teacher_id: Ulid,
    pub subject_id: Ulid,
    pub at: Ms,
    #[serde(default)]
    pub notes: Option<String>,
}

// ── Per-teacher state ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TeacherState {
    pub id: Ulid,
    /// Declaration order; the first window containing a time wins.
    pub windows: Vec<AvailabilityWindow>,
    /// All appointments (any status), sorted by `at`.
    pub appointments: Vec<Appointment>,
}

impl TeacherState {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            windows: Vec::new(),
            appointments: Vec::new(),
        }
    }

    pub fn window(&self, id: &Ulid) -> Option<&AvailabilityWindow> {
        self.windows.iter().find(|w| w.id == *id)
    }

    /// Insert or replace in place, keeping declaration order.
    pub fn put_window(&mut self, window: AvailabilityWindow) {
        match self.windows.iter_mut().find(|w| w.id == window.id) {
            Some(slot) => *slot = window,
            None => self.windows.push(window),
        }
    }

    pub fn remove_window(&mut self, id: Ulid) -> Option<AvailabilityWindow> {
        let pos = self.windows.iter().position(|w| w.id == id)?;
        Some(self.windows.remove(pos))
    }

    /// Another window occupying the same (subject, day, hours) tuple.
    pub fn duplicate_of(&self, candidate: &AvailabilityWindow) -> Option<Ulid> {
        self.windows
            .iter()
            .find(|w| w.id != candidate.id && w.same_slot_as(candidate))
            .map(|w| w.id)
    }

    /// Windows for a subject on a weekday that have not expired by `date`.
    pub fn windows_on(
        &self,
        subject_id: Ulid,
        day: DayOfWeek,
        date: NaiveDate,
    ) -> impl Iterator<Item = &AvailabilityWindow> {
        self.windows
            .iter()
            .filter(move |w| w.subject_id == subject_id && w.day == day && w.in_effect_on(date))
    }

    pub fn appointment(&self, id: &Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == *id)
    }

    /// Insert or replace, maintaining sort order by `at`.
    pub fn put_appointment(&mut self, appointment: Appointment) {
        if let Some(pos) = self.appointments.iter().position(|a| a.id == appointment.id) {
            self.appointments.remove(pos);
        }
        let pos = self
            .appointments
            .partition_point(|a| a.at <= appointment.at);
        self.appointments.insert(pos, appointment);
    }

    /// Appointments whose span overlaps the query window.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self.appointments.partition_point(|a| a.at < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.span().end > query.start)
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    WindowAdded { window: AvailabilityWindow },
    WindowUpdated { window: AvailabilityWindow },
    WindowRemoved { id: Ulid, teacher_id: Ulid },
    AppointmentRequested { appointment: Appointment },
    AppointmentUpdated { appointment: Appointment },
}

impl Event {
    pub fn teacher_id(&self) -> Ulid {
        match self {
            Event::WindowAdded { window } | Event::WindowUpdated { window } => window.teacher_id,
            Event::WindowRemoved { teacher_id, .. } => *teacher_id,
            Event::AppointmentRequested { appointment }
            | Event::AppointmentUpdated { appointment } => appointment.teacher_id,
        }
    }

    /// The student concerned, for appointment events.
    pub fn student_id(&self) -> Option<Ulid> {
        match self {
            Event::AppointmentRequested { appointment }
            | Event::AppointmentUpdated { appointment } => Some(appointment.student_id),
            _ => None,
        }
    }
}
