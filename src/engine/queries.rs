//! Read path: listings and availability queries. Reads take per-room read
//! locks only, so they never block each other and never mutate anything.

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::{display_status, free_windows, summarize};
use super::conflict::validate_window;
use super::{Engine, EngineError};

impl Engine {
    pub fn list_floors(&self, include_inactive: bool) -> Vec<Floor> {
        let mut floors: Vec<Floor> = self
            .floors
            .iter()
            .map(|e| e.value().clone())
            .filter(|f| include_inactive || f.active)
            .collect();
        floors.sort_by_key(|f| f.number);
        floors
    }

    pub async fn list_rooms(&self, floor_id: Ulid) -> Result<Vec<Room>, EngineError> {
        if !self.floors.contains_key(&floor_id) {
            return Err(EngineError::NotFound(floor_id));
        }
        let ids = self
            .rooms_by_floor
            .get(&floor_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut rooms = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(rs) = self.get_room(&id) {
                rooms.push(rs.read().await.room.clone());
            }
        }
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rooms)
    }

    /// One room's day view: every non-terminal booking (redacted per viewer)
    /// plus the free gaps inside business hours.
    pub async fn room_availability(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        viewer: Option<&str>,
    ) -> Result<RoomAvailability, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        let day = guard.bookings_on(date);
        let bookings = day
            .iter()
            .filter(|b| b.status.holds_slot())
            .map(|b| summarize(b, viewer))
            .collect();
        let free = if guard.room.active {
            free_windows(day, &self.hours)
        } else {
            Vec::new()
        };
        Ok(RoomAvailability { room_id, date, bookings, free })
    }

    /// Availability for every room on one date, optionally scoped to a floor.
    /// Without a floor filter, rooms on inactive floors are skipped.
    pub async fn get_availability(
        &self,
        date: NaiveDate,
        floor_id: Option<Ulid>,
        viewer: Option<&str>,
    ) -> Result<Vec<RoomAvailability>, EngineError> {
        let room_ids: Vec<Ulid> = match floor_id {
            Some(floor_id) => {
                if !self.floors.contains_key(&floor_id) {
                    return Err(EngineError::NotFound(floor_id));
                }
                self.rooms_by_floor
                    .get(&floor_id)
                    .map(|e| e.value().clone())
                    .unwrap_or_default()
            }
            None => {
                let mut ids = Vec::new();
                for entry in self.rooms_by_floor.iter() {
                    let active = self
                        .floors
                        .get(entry.key())
                        .is_some_and(|f| f.value().active);
                    if active {
                        ids.extend_from_slice(entry.value());
                    }
                }
                ids
            }
        };

        let mut out = Vec::with_capacity(room_ids.len());
        for id in room_ids {
            if let Ok(avail) = self.room_availability(id, date, viewer).await {
                out.push(avail);
            }
        }
        out.sort_by_key(|a| a.room_id);
        Ok(out)
    }

    /// Point query: available / pending / booked / maintenance for a room
    /// and candidate window. Bounds go through the same window validation
    /// as booking creation.
    pub async fn get_display_status(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        start: Minute,
        end: Minute,
    ) -> Result<DisplayStatus, EngineError> {
        let window = validate_window(start, end, &self.hours)?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(display_status(&guard.room, guard.bookings_on(date), &window))
    }

    /// All bookings (any status), newest first. With `mine_only` the list is
    /// restricted to the actor's own requests; the unrestricted form is the
    /// manager view and returns bookings whole.
    pub async fn list_bookings(&self, actor: &str, mine_only: bool) -> Vec<Booking> {
        let mut out = Vec::new();
        for entry in self.rooms.iter() {
            let rs = entry.value().clone();
            drop(entry);
            let guard = rs.read().await;
            for day in guard.days.values() {
                for b in day {
                    if !mine_only || b.requester == actor {
                        out.push(b.clone());
                    }
                }
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// The approval queue: every pending booking, oldest first.
    pub async fn list_pending_bookings(&self) -> Vec<Booking> {
        let mut out = Vec::new();
        for entry in self.rooms.iter() {
            let rs = entry.value().clone();
            drop(entry);
            let guard = rs.read().await;
            for day in guard.days.values() {
                for b in day {
                    if b.status == BookingStatus::Pending {
                        out.push(b.clone());
                    }
                }
            }
        }
        out.sort_by_key(|b| b.created_at);
        out
    }
}
