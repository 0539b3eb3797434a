use crate::model::*;

// ── Availability Resolver ─────────────────────────────────────────
//
// Everything here is a pure function over a ledger snapshot: the
// available/booked/pending label is always recomputed, never cached on
// the room, so it cannot go stale.

/// Status label for a room and requested window on one date.
///
/// `approved` dominates `pending`: an approved reservation is the binding
/// truth even when a pending one also overlaps the query.
pub fn display_status(room: &Room, bookings: &[Booking], window: &TimeWindow) -> DisplayStatus {
    if !room.active {
        return DisplayStatus::Maintenance;
    }
    let mut pending = false;
    for b in bookings {
        if !b.window.overlaps(window) {
            continue;
        }
        match b.status {
            BookingStatus::Approved => return DisplayStatus::Booked,
            BookingStatus::Pending => pending = true,
            BookingStatus::Rejected | BookingStatus::Cancelled => {}
        }
    }
    if pending {
        DisplayStatus::Pending
    } else {
        DisplayStatus::Available
    }
}

/// Free gaps inside business hours once all slot-holding bookings are
/// subtracted.
pub fn free_windows(bookings: &[Booking], hours: &BusinessHours) -> Vec<TimeWindow> {
    if hours.close <= hours.open {
        return Vec::new();
    }
    let mut held: Vec<TimeWindow> = bookings
        .iter()
        .filter(|b| b.status.holds_slot())
        .map(|b| b.window)
        .collect();
    held.sort_by_key(|w| w.start);
    let held = merge_windows(&held);
    subtract_windows(&[TimeWindow::new(hours.open, hours.close)], &held)
}

/// Merge sorted overlapping/adjacent windows into disjoint windows.
pub fn merge_windows(sorted: &[TimeWindow]) -> Vec<TimeWindow> {
    let mut merged: Vec<TimeWindow> = Vec::new();
    for &window in sorted {
        if let Some(last) = merged.last_mut()
            && window.start <= last.end
        {
            last.end = last.end.max(window.end);
            continue;
        }
        merged.push(window);
    }
    merged
}

/// Subtract sorted disjoint `to_remove` windows from sorted `base` windows.
pub fn subtract_windows(base: &[TimeWindow], to_remove: &[TimeWindow]) -> Vec<TimeWindow> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(TimeWindow::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(TimeWindow::new(current_start, current_end));
        }
    }

    result
}

/// Room-card view of one booking. Private bookings expose only status and
/// window to everyone but their requester.
pub fn summarize(booking: &Booking, viewer: Option<&str>) -> BookingSummary {
    let visible = booking.visibility == Visibility::Public
        || viewer.is_some_and(|v| v == booking.requester);
    BookingSummary {
        id: booking.id,
        window: booking.window,
        status: booking.status,
        title: visible.then(|| booking.title.clone()),
        requester: visible.then(|| booking.requester.clone()),
    }
}
