use chrono::NaiveDate;

use crate::model::*;
use crate::zone::ZonePolicy;

/// Cut a window into back-to-back slots that end no later than the window.
pub fn generate_slots(window: &AvailabilityWindow, date: NaiveDate, zone: &ZonePolicy) -> Vec<OpenSlot> {
    let mut slots = Vec::new();
    let mut clock = window.hours.start;
    while let Some(slot_end) = clock.checked_add(window.slot_minutes) {
        if slot_end > window.hours.end {
            break;
        }
        if let Some(start) = zone.instant_of(date, clock) {
            slots.push(OpenSlot {
                window_id: window.id,
                start,
                end: start + Ms::from(window.slot_minutes) * MINUTE_MS,
            });
        }
        clock = slot_end;
    }
    slots
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Slots of `windows` on `date` that no busy span touches.
///
/// Windows are visited in declaration order; when two windows produce a slot
/// at the same start, the earlier window's slot is kept.
pub fn open_slots(
    windows: &[AvailabilityWindow],
    busy: &[Span],
    date: NaiveDate,
    zone: &ZonePolicy,
) -> Vec<OpenSlot> {
    let mut busy = busy.to_vec();
    busy.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&busy);

    let mut result: Vec<OpenSlot> = Vec::new();
    for window in windows {
        for slot in generate_slots(window, date, zone) {
            if result.iter().any(|s| s.start == slot.start) {
                continue;
            }
            let span = Span::new(slot.start, slot.end);
            // Skip busy spans that end at or before this slot starts.
            let first = busy.partition_point(|b| b.end <= span.start);
            if busy.get(first).is_some_and(|b| b.overlaps(&span)) {
                continue;
            }
            result.push(slot);
        }
    }
    result.sort_by_key(|s| s.start);
    result
}
