//! Wire protocol: one JSON object per line, tagged by `op` on requests and
//! `kind` on responses. Kept deliberately flat so any language with a JSON
//! library and a TCP socket is a client.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Must be the first frame on a connection.
    Hello {
        token: String,
    },
    ListFloors {
        #[serde(default)]
        include_inactive: bool,
    },
    ListRooms {
        floor_id: Ulid,
    },
    GetAvailability {
        date: NaiveDate,
        #[serde(default)]
        floor_id: Option<Ulid>,
        #[serde(default)]
        viewer: Option<String>,
    },
    GetRoomAvailability {
        room_id: Ulid,
        date: NaiveDate,
        #[serde(default)]
        viewer: Option<String>,
    },
    GetDisplayStatus {
        room_id: Ulid,
        date: NaiveDate,
        start: Minute,
        end: Minute,
    },
    CreateFloor {
        number: i16,
        name: String,
        #[serde(default)]
        layout_ref: Option<String>,
        actor: String,
    },
    UpdateFloor {
        id: Ulid,
        #[serde(default)]
        name: Option<String>,
        #[serde(default, with = "double_option")]
        layout_ref: Option<Option<String>>,
        #[serde(default)]
        active: Option<bool>,
        actor: String,
    },
    CreateRoom {
        floor_id: Ulid,
        name: String,
        capacity: u32,
        #[serde(default)]
        room_type: RoomType,
        #[serde(default)]
        equipment: Vec<String>,
        #[serde(default)]
        requires_approval: bool,
        #[serde(default)]
        position: Option<Position>,
        actor: String,
    },
    UpdateRoom {
        id: Ulid,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        capacity: Option<u32>,
        #[serde(default)]
        equipment: Option<Vec<String>>,
        #[serde(default)]
        requires_approval: Option<bool>,
        #[serde(default, with = "double_option")]
        position: Option<Option<Position>>,
        #[serde(default)]
        active: Option<bool>,
        actor: String,
    },
    CreateBooking {
        /// Client-assigned id for idempotent retries; generated when absent.
        #[serde(default)]
        id: Option<Ulid>,
        room_id: Ulid,
        date: NaiveDate,
        start: Minute,
        end: Minute,
        title: String,
        #[serde(default)]
        purpose: Purpose,
        #[serde(default)]
        visibility: Visibility,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        participants: Vec<String>,
        requester: String,
    },
    ApproveBooking {
        id: Ulid,
        actor: String,
    },
    RejectBooking {
        id: Ulid,
        actor: String,
        #[serde(default)]
        reason: Option<String>,
    },
    CancelBooking {
        id: Ulid,
        actor: String,
        #[serde(default)]
        manager: bool,
    },
    ListBookings {
        #[serde(default)]
        scope: Scope,
        actor: String,
    },
    ListPendingBookings,
    Subscribe {
        room_id: Ulid,
    },
}

/// `{"field": null}` and a missing field both deserialize through
/// `Option<Option<T>>`: absent means "leave unchanged", explicit null means
/// "clear".
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn deserialize<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(de).map(Some)
    }

    pub fn serialize<T, S>(value: &Option<Option<T>>, ser: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(ser),
            None => ser.serialize_none(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Mine,
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Floor {
        floor: Floor,
    },
    Floors {
        floors: Vec<Floor>,
    },
    Room {
        room: Room,
    },
    Rooms {
        rooms: Vec<Room>,
    },
    Availability {
        rooms: Vec<RoomAvailability>,
    },
    RoomDay {
        availability: RoomAvailability,
    },
    Status {
        status: DisplayStatus,
    },
    Booking {
        booking: Booking,
        message: String,
    },
    Bookings {
        bookings: Vec<Booking>,
    },
    Event {
        room_id: Ulid,
        event: Event,
    },
    Err {
        error: ErrorBody,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_id: Option<Ulid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<TimeWindow>,
}

impl From<&EngineError> for ErrorBody {
    fn from(err: &EngineError) -> Self {
        let code = match err {
            EngineError::Validation(_) => "validation",
            EngineError::Conflict { .. } => "conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::Unauthorized(_) => "unauthorized",
            EngineError::LimitExceeded(_) => "limit",
            EngineError::Wal(_) => "internal",
        };
        let (conflict_id, window) = match err {
            EngineError::Conflict { booking_id, window } => (Some(*booking_id), Some(*window)),
            _ => (None, None),
        };
        Self {
            code: code.to_string(),
            message: err.to_string(),
            conflict_id,
            window,
        }
    }
}

impl Response {
    pub fn error(err: &EngineError) -> Self {
        Response::Err { error: err.into() }
    }
}
