use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — used for all record timestamps.
pub type Ms = i64;

/// Minute of day, 0..=1440.
pub type Minute = u16;

/// Bookable hours of the day, `[open, close)` in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    pub open: Minute,
    pub close: Minute,
}

impl Default for BusinessHours {
    /// 07:00–24:00.
    fn default() -> Self {
        Self { open: 420, close: 1440 }
    }
}

impl BusinessHours {
    pub fn covers(&self, window: &TimeWindow) -> bool {
        self.open <= window.start && window.end <= self.close
    }
}

/// Half-open interval `[start, end)` in minute-of-day resolution,
/// always on a single calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: Minute,
    pub end: Minute,
}

impl TimeWindow {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "TimeWindow start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> Minute {
        self.end - self.start
    }

    /// Half-open semantics: a window ending at 10:00 does not overlap
    /// one starting at 10:00.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, minute: Minute) -> bool {
        self.start <= minute && minute < self.end
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start / 60,
            self.start % 60,
            self.end / 60,
            self.end % 60
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl BookingStatus {
    /// Pending bookings provisionally hold a slot exactly like approved ones,
    /// since they may later be approved.
    pub fn holds_slot(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Approved)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Rejected | BookingStatus::Cancelled)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    #[default]
    Standard,
    Conference,
    Vip,
    Training,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    #[default]
    Meeting,
    Training,
    Interview,
    Presentation,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Grid position on the floor layout image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Floor {
    pub id: Ulid,
    /// Unique, defines display order.
    pub number: i16,
    pub name: String,
    pub layout_ref: Option<String>,
    /// Deactivation hides the floor and its rooms from booking flows
    /// but keeps all history.
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub floor_id: Ulid,
    /// Unique within the floor.
    pub name: String,
    pub capacity: u32,
    pub room_type: RoomType,
    pub equipment: Vec<String>,
    /// New bookings on this room start pending and need a human sign-off.
    pub requires_approval: bool,
    pub position: Option<Position>,
    /// false = under maintenance, not bookable.
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub requester: String,
    pub date: NaiveDate,
    pub window: TimeWindow,
    pub title: String,
    pub purpose: Purpose,
    pub visibility: Visibility,
    pub description: Option<String>,
    pub participants: Vec<String>,
    pub status: BookingStatus,
    pub rejection_reason: Option<String>,
    pub approver: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// Caller input for a new booking. The id is assigned by the caller so that
/// a retry after a dropped response hits the duplicate check instead of
/// double-booking.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub id: Ulid,
    pub room_id: Ulid,
    pub date: NaiveDate,
    pub start: Minute,
    pub end: Minute,
    pub title: String,
    pub purpose: Purpose,
    pub visibility: Visibility,
    pub description: Option<String>,
    pub participants: Vec<String>,
    pub requester: String,
}

/// Per-room booking ledger. One write lock around this struct serializes
/// conflict-check-and-insert for the room.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Bookings grouped by date, each day sorted by window start.
    pub days: BTreeMap<NaiveDate, Vec<Booking>>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            days: BTreeMap::new(),
        }
    }

    /// Insert a booking maintaining sort order by window start within its day.
    pub fn insert_booking(&mut self, booking: Booking) {
        let day = self.days.entry(booking.date).or_default();
        let pos = day
            .binary_search_by_key(&booking.window.start, |b| b.window.start)
            .unwrap_or_else(|e| e);
        day.insert(pos, booking);
    }

    pub fn bookings_on(&self, date: NaiveDate) -> &[Booking] {
        self.days.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn booking(&self, date: NaiveDate, id: Ulid) -> Option<&Booking> {
        self.days
            .get(&date)
            .and_then(|day| day.iter().find(|b| b.id == id))
    }

    pub fn booking_mut(&mut self, date: NaiveDate, id: Ulid) -> Option<&mut Booking> {
        self.days
            .get_mut(&date)
            .and_then(|day| day.iter_mut().find(|b| b.id == id))
    }

    /// Bookings on `date` whose window overlaps `window`, regardless of status.
    pub fn overlapping<'a>(
        &'a self,
        date: NaiveDate,
        window: &'a TimeWindow,
    ) -> impl Iterator<Item = &'a Booking> {
        self.bookings_on(date)
            .iter()
            .filter(move |b| b.window.overlaps(window))
    }
}

/// The event types — flat, no nesting. This is the WAL record format and
/// the payload pushed to room subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    FloorCreated {
        floor: Floor,
    },
    FloorUpdated {
        floor: Floor,
    },
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        room: Room,
    },
    BookingRequested {
        booking: Booking,
    },
    BookingApproved {
        id: Ulid,
        room_id: Ulid,
        date: NaiveDate,
        approver: String,
        at: Ms,
    },
    BookingRejected {
        id: Ulid,
        room_id: Ulid,
        date: NaiveDate,
        actor: String,
        reason: Option<String>,
        at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        room_id: Ulid,
        date: NaiveDate,
        actor: String,
        at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

/// Derived, never stored: the label shown for a room/window query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayStatus {
    Available,
    Booked,
    Pending,
    Maintenance,
}

/// A booking as shown on the room card. Title and requester are withheld
/// for private bookings unless the viewer is the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSummary {
    pub id: Ulid,
    pub window: TimeWindow,
    pub status: BookingStatus,
    pub title: Option<String>,
    pub requester: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomAvailability {
    pub room_id: Ulid,
    pub date: NaiveDate,
    pub bookings: Vec<BookingSummary>,
    /// Free gaps inside business hours, for rendering open slots.
    pub free: Vec<TimeWindow>,
}
