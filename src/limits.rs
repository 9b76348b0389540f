use crate::model::Ms;

pub const MIN_SLOT_MINUTES: u16 = 15;
pub const MAX_SLOT_MINUTES: u16 = 120;
pub const DEFAULT_SLOT_MINUTES: u16 = 30;
pub const DEFAULT_MAX_BOOKINGS: u32 = 1;

pub const MAX_TEACHERS: usize = 100_000;
pub const MAX_WINDOWS_PER_TEACHER: usize = 1_000;
pub const MAX_APPOINTMENTS_PER_TEACHER: usize = 100_000;

/// Notes, feedback and cancellation reasons.
pub const MAX_TEXT_LEN: usize = 4_096;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// Longest accepted request line on the wire.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Largest encoded WAL event. A longer length prefix marks a corrupt entry.
pub const MAX_EVENT_LEN: usize = 64 * 1024;
