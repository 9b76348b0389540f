use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn validate_instant(at: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&at) {
        return Err(EngineError::InvalidInput("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_text(text: Option<&str>, what: &'static str) -> Result<(), EngineError> {
    if text.is_some_and(|t| t.len() > MAX_TEXT_LEN) {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

pub(crate) fn validate_window(window: &AvailabilityWindow) -> Result<(), EngineError> {
    // Deserialized hours skip the constructor check.
    DailyHours::new(window.hours.start, window.hours.end)?;
    if !(MIN_SLOT_MINUTES..=MAX_SLOT_MINUTES).contains(&window.slot_minutes) {
        return Err(EngineError::InvalidInput("slot duration must be 15 to 120 minutes"));
    }
    if window.max_bookings == 0 {
        return Err(EngineError::InvalidInput("max bookings must be at least 1"));
    }
    if window.valid_until.is_some_and(|until| until < window.valid_from) {
        return Err(EngineError::InvalidInput("valid_until precedes valid_from"));
    }
    Ok(())
}

/// First active appointment whose span overlaps `slot`.
pub(crate) fn first_conflict<'a>(
    appointments: impl IntoIterator<Item = &'a Appointment>,
    slot: &Span,
) -> Option<&'a Appointment> {
    appointments
        .into_iter()
        .find(|a| a.status.is_active() && a.span().overlaps(slot))
}
