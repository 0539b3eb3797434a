//! Write path: registry mutations and the booking state machine.
//!
//! Every transition goes WAL-append → in-memory apply → notify, under the
//! room's write lock, so a booking is never visible before it is durable
//! and two conflicting requests can never both pass the overlap check.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;
use ulid::Ulid;

use crate::audit::AuditEntry;
use crate::limits;
use crate::model::*;

use super::conflict::{find_approved_conflict, find_conflict, now_ms, validate_window};
use super::{Engine, EngineError};

fn check_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation(what));
    }
    if name.len() > limits::MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

impl Engine {
    // ── Registry: floors ─────────────────────────────────

    pub async fn create_floor(
        &self,
        number: i16,
        name: String,
        layout_ref: Option<String>,
        actor: &str,
    ) -> Result<Floor, EngineError> {
        check_name(&name, "floor name required")?;
        if self.floors.len() >= limits::MAX_FLOORS {
            return Err(EngineError::LimitExceeded("too many floors"));
        }
        if self.floors.iter().any(|e| e.value().number == number) {
            return Err(EngineError::Validation("floor number already in use"));
        }

        let floor = Floor {
            id: Ulid::new(),
            number,
            name,
            layout_ref,
            active: true,
        };
        let event = Event::FloorCreated { floor: floor.clone() };
        self.wal_append(&event).await?;
        self.floors.insert(floor.id, floor.clone());
        self.rooms_by_floor.entry(floor.id).or_default();

        debug!(floor = %floor.id, number, "floor created");
        self.audit
            .record(AuditEntry {
                at: now_ms(),
                actor: actor.to_string(),
                op: "create_floor",
                entity: floor.id,
                detail: format!("number {number}"),
            })
            .await;
        Ok(floor)
    }

    pub async fn update_floor(
        &self,
        id: Ulid,
        name: Option<String>,
        layout_ref: Option<Option<String>>,
        active: Option<bool>,
        actor: &str,
    ) -> Result<Floor, EngineError> {
        let mut floor = self.get_floor(&id).ok_or(EngineError::NotFound(id))?;
        if let Some(name) = name {
            check_name(&name, "floor name required")?;
            floor.name = name;
        }
        if let Some(layout_ref) = layout_ref {
            floor.layout_ref = layout_ref;
        }
        if let Some(active) = active {
            floor.active = active;
        }

        let event = Event::FloorUpdated { floor: floor.clone() };
        self.wal_append(&event).await?;
        self.floors.insert(floor.id, floor.clone());

        self.audit
            .record(AuditEntry {
                at: now_ms(),
                actor: actor.to_string(),
                op: "update_floor",
                entity: floor.id,
                detail: format!("active {}", floor.active),
            })
            .await;
        Ok(floor)
    }

    // ── Registry: rooms ──────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn create_room(
        &self,
        floor_id: Ulid,
        name: String,
        capacity: u32,
        room_type: RoomType,
        equipment: Vec<String>,
        requires_approval: bool,
        position: Option<Position>,
        actor: &str,
    ) -> Result<Room, EngineError> {
        check_name(&name, "room name required")?;
        if capacity == 0 {
            return Err(EngineError::Validation("capacity must be at least 1"));
        }
        if equipment.len() > limits::MAX_EQUIPMENT_ITEMS {
            return Err(EngineError::LimitExceeded("too many equipment items"));
        }
        if self.rooms.len() >= limits::MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if !self.floors.contains_key(&floor_id) {
            return Err(EngineError::NotFound(floor_id));
        }
        if self.sibling_room_named(floor_id, &name, None).await {
            return Err(EngineError::Validation("room name already in use on floor"));
        }

        let room = Room {
            id: Ulid::new(),
            floor_id,
            name,
            capacity,
            room_type,
            equipment,
            requires_approval,
            position,
            active: true,
        };
        let event = Event::RoomCreated { room: room.clone() };
        self.wal_append(&event).await?;
        self.rooms_by_floor.entry(floor_id).or_default().push(room.id);
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));

        debug!(room = %room.id, floor = %floor_id, "room created");
        self.audit
            .record(AuditEntry {
                at: now_ms(),
                actor: actor.to_string(),
                op: "create_room",
                entity: room.id,
                detail: format!("floor {floor_id}"),
            })
            .await;
        Ok(room)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update_room(
        &self,
        id: Ulid,
        name: Option<String>,
        capacity: Option<u32>,
        equipment: Option<Vec<String>>,
        requires_approval: Option<bool>,
        position: Option<Option<Position>>,
        active: Option<bool>,
        actor: &str,
    ) -> Result<Room, EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;

        // Name uniqueness is checked before taking the write lock; sibling
        // reads under our own write lock would invert lock order.
        if let Some(name) = &name {
            check_name(name, "room name required")?;
            let (floor_id, current) = {
                let guard = rs.read().await;
                (guard.room.floor_id, guard.room.name.clone())
            };
            if *name != current && self.sibling_room_named(floor_id, name, Some(id)).await {
                return Err(EngineError::Validation("room name already in use on floor"));
            }
        }

        let mut guard = rs.write().await;
        let mut room = guard.room.clone();

        if let Some(name) = name {
            room.name = name;
        }
        if let Some(capacity) = capacity {
            if capacity == 0 {
                return Err(EngineError::Validation("capacity must be at least 1"));
            }
            room.capacity = capacity;
        }
        if let Some(equipment) = equipment {
            if equipment.len() > limits::MAX_EQUIPMENT_ITEMS {
                return Err(EngineError::LimitExceeded("too many equipment items"));
            }
            room.equipment = equipment;
        }
        if let Some(requires_approval) = requires_approval {
            room.requires_approval = requires_approval;
        }
        if let Some(position) = position {
            room.position = position;
        }
        if let Some(active) = active {
            room.active = active;
        }

        let event = Event::RoomUpdated { room: room.clone() };
        self.persist_and_apply(id, &mut guard, &event).await?;
        drop(guard);

        self.audit
            .record(AuditEntry {
                at: now_ms(),
                actor: actor.to_string(),
                op: "update_room",
                entity: id,
                detail: format!("active {}", room.active),
            })
            .await;
        Ok(room)
    }

    /// True if another room on `floor_id` already has this name. Reads each
    /// sibling's state briefly; room renames are rare so the scan is fine.
    async fn sibling_room_named(&self, floor_id: Ulid, name: &str, exclude: Option<Ulid>) -> bool {
        let siblings = match self.rooms_by_floor.get(&floor_id) {
            Some(e) => e.value().clone(),
            None => return false,
        };
        for sibling in siblings {
            if Some(sibling) == exclude {
                continue;
            }
            if let Some(rs) = self.get_room(&sibling) {
                let guard = rs.read().await;
                if guard.room.name == name {
                    return true;
                }
            }
        }
        false
    }

    // ── Booking state machine ────────────────────────────

    /// Request a booking. Returns the stored booking and a human-readable
    /// outcome message ("booking confirmed" or "booking awaiting approval").
    pub async fn create_booking(
        &self,
        req: BookingRequest,
    ) -> Result<(Booking, &'static str), EngineError> {
        if req.requester.trim().is_empty() {
            return Err(EngineError::Validation("requester identity required"));
        }
        if req.requester.len() > limits::MAX_ACTOR_LEN {
            return Err(EngineError::LimitExceeded("requester too long"));
        }
        if req.title.trim().is_empty() {
            return Err(EngineError::Validation("title required"));
        }
        if req.title.len() > limits::MAX_TITLE_LEN {
            return Err(EngineError::LimitExceeded("title too long"));
        }
        if let Some(desc) = &req.description
            && desc.len() > limits::MAX_DESCRIPTION_LEN
        {
            return Err(EngineError::LimitExceeded("description too long"));
        }
        if req.participants.len() > limits::MAX_PARTICIPANTS {
            return Err(EngineError::LimitExceeded("too many participants"));
        }
        let window = validate_window(req.start, req.end, &self.hours)?;

        let rs = self
            .get_room(&req.room_id)
            .ok_or(EngineError::NotFound(req.room_id))?;
        let mut guard = rs.write().await;

        if !guard.room.active {
            return Err(EngineError::Validation("room is out of service"));
        }
        match self.get_floor(&guard.room.floor_id) {
            Some(floor) if floor.active => {}
            _ => return Err(EngineError::Validation("floor is inactive")),
        }

        let day = guard.bookings_on(req.date);
        if day.len() >= limits::MAX_BOOKINGS_PER_ROOM_DAY {
            return Err(EngineError::LimitExceeded("too many bookings for this day"));
        }
        // Booking ids are caller-assigned and the index is global: a reused
        // id on any room or date would shadow the older booking there.
        if self.booking_index.contains_key(&req.id) || day.iter().any(|b| b.id == req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }
        if let Some((booking_id, window)) = find_conflict(day, &window) {
            return Err(EngineError::Conflict { booking_id, window });
        }

        let status = if self.gate.requires_approval(&guard.room) {
            BookingStatus::Pending
        } else {
            BookingStatus::Approved
        };
        let now = now_ms();
        let booking = Booking {
            id: req.id,
            room_id: req.room_id,
            requester: req.requester,
            date: req.date,
            window,
            title: req.title,
            purpose: req.purpose,
            visibility: req.visibility,
            description: req.description,
            participants: req.participants,
            status,
            rejection_reason: None,
            approver: None,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingRequested { booking: booking.clone() };
        self.persist_and_apply(req.room_id, &mut guard, &event).await?;
        drop(guard);

        let message = match status {
            BookingStatus::Approved => "booking confirmed",
            _ => "booking awaiting approval",
        };
        debug!(booking = %booking.id, room = %booking.room_id, %status, "booking requested");
        self.audit
            .record(AuditEntry {
                at: now,
                actor: booking.requester.clone(),
                op: "create_booking",
                entity: booking.id,
                detail: format!("{} {} {status}", booking.date, booking.window),
            })
            .await;
        Ok((booking, message))
    }

    pub async fn approve_booking(&self, id: Ulid, actor: &str) -> Result<Booking, EngineError> {
        if actor.trim().is_empty() {
            return Err(EngineError::Unauthorized("approver identity required"));
        }
        let (room_id, date, mut guard) = self.resolve_booking_write(&id).await?;

        let booking = guard.booking(date, id).ok_or(EngineError::NotFound(id))?;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::InvalidTransition {
                from: booking.status,
                action: "approve",
            });
        }
        // Another overlapping pending may have slipped in before this one via
        // replayed history; an already-approved collision must win.
        let window = booking.window;
        if let Some((booking_id, window)) = find_approved_conflict(guard.bookings_on(date), id, &window)
        {
            return Err(EngineError::Conflict { booking_id, window });
        }

        let at = now_ms();
        let event = Event::BookingApproved {
            id,
            room_id,
            date,
            approver: actor.to_string(),
            at,
        };
        self.persist_and_apply(room_id, &mut guard, &event).await?;
        let approved = guard
            .booking(date, id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        drop(guard);

        self.audit
            .record(AuditEntry {
                at,
                actor: actor.to_string(),
                op: "approve_booking",
                entity: id,
                detail: format!("{date} {window}"),
            })
            .await;
        Ok(approved)
    }

    pub async fn reject_booking(
        &self,
        id: Ulid,
        actor: &str,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        if actor.trim().is_empty() {
            return Err(EngineError::Unauthorized("approver identity required"));
        }
        if let Some(r) = &reason
            && r.len() > limits::MAX_REASON_LEN
        {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let (room_id, date, mut guard) = self.resolve_booking_write(&id).await?;

        let booking = guard.booking(date, id).ok_or(EngineError::NotFound(id))?;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::InvalidTransition {
                from: booking.status,
                action: "reject",
            });
        }

        let at = now_ms();
        let event = Event::BookingRejected {
            id,
            room_id,
            date,
            actor: actor.to_string(),
            reason,
            at,
        };
        self.persist_and_apply(room_id, &mut guard, &event).await?;
        let rejected = guard
            .booking(date, id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        drop(guard);

        self.audit
            .record(AuditEntry {
                at,
                actor: actor.to_string(),
                op: "reject_booking",
                entity: id,
                detail: format!("{date}"),
            })
            .await;
        Ok(rejected)
    }

    /// Cancel a pending or approved booking. Only the requester may cancel
    /// their own booking unless `manager` is set.
    pub async fn cancel_booking(
        &self,
        id: Ulid,
        actor: &str,
        manager: bool,
    ) -> Result<Booking, EngineError> {
        if actor.trim().is_empty() {
            return Err(EngineError::Unauthorized("actor identity required"));
        }
        let (room_id, date, mut guard) = self.resolve_booking_write(&id).await?;

        let booking = guard.booking(date, id).ok_or(EngineError::NotFound(id))?;
        if !booking.status.holds_slot() {
            return Err(EngineError::InvalidTransition {
                from: booking.status,
                action: "cancel",
            });
        }
        if booking.requester != actor && !manager {
            return Err(EngineError::Unauthorized("only the requester may cancel"));
        }

        let at = now_ms();
        let event = Event::BookingCancelled {
            id,
            room_id,
            date,
            actor: actor.to_string(),
            at,
        };
        self.persist_and_apply(room_id, &mut guard, &event).await?;
        let cancelled = guard
            .booking(date, id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        drop(guard);

        self.audit
            .record(AuditEntry {
                at,
                actor: actor.to_string(),
                op: "cancel_booking",
                entity: id,
                detail: format!("{date}"),
            })
            .await;
        Ok(cancelled)
    }
}
