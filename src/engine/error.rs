use ulid::Ulid;

use crate::model::{BookingStatus, TimeWindow};

#[derive(Debug)]
pub enum EngineError {
    /// Malformed request: bad window, empty required field, inactive room.
    /// Recoverable by resubmitting corrected input.
    Validation(&'static str),
    /// Requested window overlaps an existing pending/approved booking.
    /// Carries the colliding booking so the caller can suggest alternatives.
    Conflict {
        booking_id: Ulid,
        window: TimeWindow,
    },
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Approve/reject/cancel attempted from a state that does not permit it.
    InvalidTransition {
        from: BookingStatus,
        action: &'static str,
    },
    Unauthorized(&'static str),
    LimitExceeded(&'static str),
    Wal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation: {msg}"),
            EngineError::Conflict { booking_id, window } => {
                write!(f, "conflict with booking {booking_id} at {window}")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidTransition { from, action } => {
                write!(f, "cannot {action} a {from} booking")
            }
            EngineError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
