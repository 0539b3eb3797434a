//! Hard input limits. Everything user-supplied is bounded before it
//! reaches the ledger.

pub const MAX_FLOORS: usize = 64;
pub const MAX_ROOMS: usize = 4096;
pub const MAX_NAME_LEN: usize = 128;
pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 4096;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_ACTOR_LEN: usize = 128;
pub const MAX_PARTICIPANTS: usize = 64;
pub const MAX_EQUIPMENT_ITEMS: usize = 32;
pub const MAX_BOOKINGS_PER_ROOM_DAY: usize = 256;

/// One JSON frame on the wire.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

pub const MINUTES_PER_DAY: u16 = 1440;
