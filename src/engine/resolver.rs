use std::fmt;

use ulid::Ulid;

use crate::model::*;
use crate::observability::SLOT_DECISIONS_TOTAL;
use crate::zone::ZonePolicy;

use super::conflict::{first_conflict, validate_instant};
use super::store::ScheduleStore;
use super::EngineError;

/// Why a candidate instant cannot be booked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No window for this subject on this weekday (or all have expired).
    NoAvailability { day: DayOfWeek },
    /// Windows exist on this weekday but none contains the clock time.
    OutsideHours {
        day: DayOfWeek,
        clock: MinuteOfDay,
        declared: Vec<DailyHours>,
    },
    /// An active appointment of the same teacher overlaps the slot.
    SlotTaken { appointment_id: Ulid },
}

impl Rejection {
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::NoAvailability { .. } => "no_availability",
            Rejection::OutsideHours { .. } => "outside_hours",
            Rejection::SlotTaken { .. } => "slot_taken",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoAvailability { day } => write!(f, "no availability declared for {day}"),
            Rejection::OutsideHours { day, clock, declared } => {
                write!(f, "{clock} is outside hours declared for {day} (")?;
                for (i, hours) in declared.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{hours}")?;
                }
                f.write_str(")")
            }
            Rejection::SlotTaken { .. } => f.write_str("slot already booked"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotDecision {
    /// `slot` is `[at, at + window.slot_minutes)` of the authoritative window.
    Accepted { window_id: Ulid, slot: Span },
    Rejected(Rejection),
}

impl SlotDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SlotDecision::Accepted { .. })
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            SlotDecision::Accepted { .. } => None,
            SlotDecision::Rejected(r) => Some(r.to_string()),
        }
    }

    fn outcome_label(&self) -> &'static str {
        match self {
            SlotDecision::Accepted { .. } => "accepted",
            SlotDecision::Rejected(r) => r.kind(),
        }
    }
}

/// Decide whether `teacher_id` can be booked for `subject_id` at `at`.
///
/// Performs no writes. Out-of-range instants fail fast with
/// `InvalidInput`; store failures are returned as-is.
pub async fn validate_appointment_slot<S>(
    store: &S,
    zone: &ZonePolicy,
    teacher_id: Ulid,
    subject_id: Ulid,
    at: Ms,
) -> Result<SlotDecision, EngineError>
where
    S: ScheduleStore + ?Sized,
{
    validate_instant(at)?;
    let local = zone
        .localize(at)
        .ok_or(EngineError::InvalidInput("instant not representable"))?;

    let windows: Vec<AvailabilityWindow> = store
        .find_availability_windows(teacher_id, subject_id, local.day, local.date)
        .await?
        .into_iter()
        .filter(|w| w.day == local.day && w.in_effect_on(local.date))
        .collect();

    let decision = if windows.is_empty() {
        SlotDecision::Rejected(Rejection::NoAvailability { day: local.day })
    } else if let Some(window) = windows.iter().find(|w| w.hours.contains(local.clock)) {
        let slot = Span::starting_at(at, window.slot_minutes);
        let booked = store
            .find_overlapping_appointments(teacher_id, slot, &AppointmentStatus::ACTIVE)
            .await?;
        match first_conflict(&booked, &slot) {
            Some(existing) => SlotDecision::Rejected(Rejection::SlotTaken {
                appointment_id: existing.id,
            }),
            None => SlotDecision::Accepted {
                window_id: window.id,
                slot,
            },
        }
    } else {
        SlotDecision::Rejected(Rejection::OutsideHours {
            day: local.day,
            clock: local.clock,
            declared: windows.iter().map(|w| w.hours).collect(),
        })
    };

    metrics::counter!(SLOT_DECISIONS_TOTAL, "outcome" => decision.outcome_label()).increment(1);
    Ok(decision)
}
