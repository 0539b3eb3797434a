mod availability;
mod conflict;
mod error;
mod policy;
mod queries;
mod workflow;

pub use availability::{display_status, free_windows, merge_windows, subtract_windows, summarize};
pub use error::EngineError;
pub use policy::{ApprovalGate, RoomFlagGate};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::audit::AuditSink;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// The Room Availability & Booking State Engine: room registry + booking
/// ledger + the single write gate for every transition.
pub struct Engine {
    /// Reference data, keyed by floor id.
    pub floors: DashMap<Ulid, Floor>,
    /// Per-room ledger; the room's write lock is the conflict-check-and-insert
    /// serialization boundary.
    pub rooms: DashMap<Ulid, SharedRoomState>,
    pub notify: Arc<NotifyHub>,
    pub(super) audit: Arc<dyn AuditSink>,
    pub(super) gate: Arc<dyn ApprovalGate>,
    pub hours: BusinessHours,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking id → (room id, booking date).
    pub(super) booking_index: DashMap<Ulid, (Ulid, NaiveDate)>,
    /// Floor → rooms index for O(1) listings.
    pub(super) rooms_by_floor: DashMap<Ulid, Vec<Ulid>>,
}

/// Apply an event directly to a RoomState (no locking — caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, index: &DashMap<Ulid, (Ulid, NaiveDate)>) {
    match event {
        Event::RoomUpdated { room } => {
            rs.room = room.clone();
        }
        Event::BookingRequested { booking } => {
            index.insert(booking.id, (booking.room_id, booking.date));
            rs.insert_booking(booking.clone());
        }
        Event::BookingApproved { id, date, approver, at, .. } => {
            if let Some(b) = rs.booking_mut(*date, *id) {
                b.status = BookingStatus::Approved;
                b.approver = Some(approver.clone());
                b.updated_at = *at;
            }
        }
        Event::BookingRejected { id, date, reason, at, .. } => {
            if let Some(b) = rs.booking_mut(*date, *id) {
                b.status = BookingStatus::Rejected;
                b.rejection_reason = reason.clone();
                b.updated_at = *at;
            }
        }
        Event::BookingCancelled { id, date, at, .. } => {
            if let Some(b) = rs.booking_mut(*date, *id) {
                b.status = BookingStatus::Cancelled;
                b.updated_at = *at;
            }
        }
        // Floor events and RoomCreated are handled at the DashMap level, not here
        Event::FloorCreated { .. } | Event::FloorUpdated { .. } | Event::RoomCreated { .. } => {}
    }
}

/// Extract the room id an event should be routed to (None for registry-level
/// events handled at the DashMap layer).
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RoomUpdated { room } => Some(room.id),
        Event::BookingRequested { booking } => Some(booking.room_id),
        Event::BookingApproved { room_id, .. }
        | Event::BookingRejected { room_id, .. }
        | Event::BookingCancelled { room_id, .. } => Some(*room_id),
        Event::FloorCreated { .. } | Event::FloorUpdated { .. } | Event::RoomCreated { .. } => None,
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        audit: Arc<dyn AuditSink>,
        gate: Arc<dyn ApprovalGate>,
        hours: BusinessHours,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            floors: DashMap::new(),
            rooms: DashMap::new(),
            notify,
            audit,
            gate,
            hours,
            wal_tx,
            booking_index: DashMap::new(),
            rooms_by_floor: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context.
        for event in &events {
            match event {
                Event::FloorCreated { floor } | Event::FloorUpdated { floor } => {
                    engine.floors.insert(floor.id, floor.clone());
                }
                Event::RoomCreated { room } => {
                    engine
                        .rooms_by_floor
                        .entry(room.floor_id)
                        .or_default()
                        .push(room.id);
                    engine
                        .rooms
                        .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                }
                other => {
                    if let Some(room_id) = event_room_id(other)
                        && let Some(entry) = engine.rooms.get(&room_id)
                    {
                        let rs_arc = entry.clone();
                        let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                        apply_to_room(&mut guard, other, &engine.booking_index);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_floor(&self, id: &Ulid) -> Option<Floor> {
        self.floors.get(id).map(|e| e.value().clone())
    }

    /// WAL-append + apply + notify in one call, in that order: a booking
    /// transition is only visible once it is durable.
    pub(super) async fn persist_and_apply(
        &self,
        room_id: Ulid,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.booking_index);
        self.notify.send(room_id, event);
        Ok(())
    }

    /// Lookup booking → (room, date), get room, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, NaiveDate, tokio::sync::OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let (room_id, date) = self
            .booking_index
            .get(booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        Ok((room_id, date, guard))
    }

    /// Pending bookings created before `cutoff`, for the expiry sweep.
    pub fn collect_stale_pending(&self, cutoff: Ms) -> Vec<Ulid> {
        let mut stale = Vec::new();
        for entry in self.rooms.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for day in guard.days.values() {
                    for b in day {
                        if b.status == BookingStatus::Pending && b.created_at <= cutoff {
                            stale.push(b.id);
                        }
                    }
                }
            }
        }
        stale
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: floors, rooms, then every booking as a
    /// single `BookingRequested` snapshot (history lives in the booking's
    /// own fields, so rejected/cancelled rows survive compaction).
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let mut floors: Vec<Floor> = self.floors.iter().map(|e| e.value().clone()).collect();
        floors.sort_by_key(|f| f.number);
        for floor in floors {
            events.push(Event::FloorCreated { floor });
        }

        let room_ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        for id in room_ids {
            let entry = match self.rooms.get(&id) {
                Some(e) => e,
                None => continue,
            };
            let rs = entry.value().clone();
            drop(entry);
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            for day in guard.days.values() {
                for booking in day {
                    events.push(Event::BookingRequested {
                        booking: booking.clone(),
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
