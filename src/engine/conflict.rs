use ulid::Ulid;

use crate::limits::MINUTES_PER_DAY;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as Ms
}

/// Validate raw window bounds against business hours and construct the window.
pub(crate) fn validate_window(
    start: Minute,
    end: Minute,
    hours: &BusinessHours,
) -> Result<TimeWindow, EngineError> {
    if end <= start {
        return Err(EngineError::Validation("window end must be after start"));
    }
    if end > MINUTES_PER_DAY {
        return Err(EngineError::Validation("window exceeds the day"));
    }
    let window = TimeWindow::new(start, end);
    if !hours.covers(&window) {
        return Err(EngineError::Validation("window outside business hours"));
    }
    Ok(window)
}

/// First-valid-request-wins: any pending or approved booking overlapping the
/// candidate window rejects it outright. Pending bookings occupy their slot so
/// an approval race can never create a double-booking that was invisible at
/// request time.
pub(crate) fn find_conflict(bookings: &[Booking], window: &TimeWindow) -> Option<(Ulid, TimeWindow)> {
    bookings
        .iter()
        .find(|b| b.status.holds_slot() && b.window.overlaps(window))
        .map(|b| (b.id, b.window))
}

/// Approval-time re-check: a colliding booking that is already `approved`
/// blocks approving this one. Guards the race where two overlapping pendings
/// were both accepted before either was approved.
pub(crate) fn find_approved_conflict(
    bookings: &[Booking],
    own_id: Ulid,
    window: &TimeWindow,
) -> Option<(Ulid, TimeWindow)> {
    bookings
        .iter()
        .find(|b| {
            b.id != own_id && b.status == BookingStatus::Approved && b.window.overlaps(window)
        })
        .map(|b| (b.id, b.window))
}
