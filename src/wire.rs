//! Connection handling: newline-delimited JSON over TCP. Each connection
//! must open with a `hello` carrying the shared token before any other
//! request is served.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_FRAME_LEN;
use crate::model::{BookingRequest, Event};
use crate::observability;
use crate::proto::{Request, Response, Scope};

/// Drive one client connection to completion.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>, token: Arc<str>) {
    let peer = socket.peer_addr().ok();
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_FRAME_LEN));

    // Handshake: first frame must be a valid hello with the right token.
    match framed.next().await {
        Some(Ok(line)) => match serde_json::from_str::<Request>(&line) {
            Ok(Request::Hello { token: presented }) if presented.as_str() == token.as_ref() => {
                if send(&mut framed, &Response::Ok).await.is_err() {
                    return;
                }
            }
            Ok(Request::Hello { .. }) => {
                metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                warn!(?peer, "rejected connection: bad token");
                let _ = send(
                    &mut framed,
                    &Response::error(&EngineError::Unauthorized("invalid token")),
                )
                .await;
                return;
            }
            _ => {
                metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                let _ = send(
                    &mut framed,
                    &Response::error(&EngineError::Validation("expected hello frame")),
                )
                .await;
                return;
            }
        },
        _ => return,
    }

    // Room events subscribed on this connection funnel through one mpsc
    // channel; a forwarder task per subscription bridges the broadcast side.
    let (event_tx, mut event_rx) = mpsc::channel::<(Ulid, Event)>(256);
    let mut forwarders: Vec<tokio::task::JoinHandle<()>> = Vec::new();

    loop {
        tokio::select! {
            frame = framed.next() => {
                let line = match frame {
                    Some(Ok(line)) => line,
                    Some(Err(e)) => {
                        debug!(?peer, error = %e, "framing error, closing");
                        break;
                    }
                    None => break,
                };
                let request = match serde_json::from_str::<Request>(&line) {
                    Ok(req) => req,
                    Err(e) => {
                        let resp = Response::Err {
                            error: crate::proto::ErrorBody {
                                code: "validation".into(),
                                message: format!("malformed request: {e}"),
                                conflict_id: None,
                                window: None,
                            },
                        };
                        if send(&mut framed, &resp).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };

                if let Request::Subscribe { room_id } = request {
                    let response = subscribe(&engine, room_id, event_tx.clone(), &mut forwarders);
                    if send(&mut framed, &response).await.is_err() {
                        break;
                    }
                    continue;
                }

                let op = observability::op_label(&request);
                let started = std::time::Instant::now();
                let response = execute(&engine, request).await;
                let status = match &response {
                    Response::Err { .. } => "error",
                    _ => "ok",
                };
                metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => status)
                    .increment(1);
                metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
                    .record(started.elapsed().as_secs_f64());

                if send(&mut framed, &response).await.is_err() {
                    break;
                }
            }
            Some((room_id, event)) = event_rx.recv() => {
                let frame = Response::Event { room_id, event };
                if send(&mut framed, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    for handle in forwarders {
        handle.abort();
    }
}

async fn send(
    framed: &mut Framed<TcpStream, LinesCodec>,
    response: &Response,
) -> Result<(), tokio_util::codec::LinesCodecError> {
    let json = serde_json::to_string(response).unwrap_or_else(|_| {
        r#"{"kind":"err","error":{"code":"internal","message":"encode failure"}}"#.to_string()
    });
    framed.send(json).await
}

fn subscribe(
    engine: &Engine,
    room_id: Ulid,
    event_tx: mpsc::Sender<(Ulid, Event)>,
    forwarders: &mut Vec<tokio::task::JoinHandle<()>>,
) -> Response {
    if engine.get_room(&room_id).is_none() {
        return Response::error(&EngineError::NotFound(room_id));
    }
    let mut rx = engine.notify.subscribe(room_id);
    forwarders.push(tokio::spawn(async move {
        // Lagged means missed events; drop the subscription rather than
        // deliver a gap silently.
        while let Ok(event) = rx.recv().await {
            if event_tx.send((room_id, event)).await.is_err() {
                break;
            }
        }
    }));
    Response::Ok
}

/// Dispatch one request against the engine.
pub async fn execute(engine: &Engine, request: Request) -> Response {
    match request {
        Request::Hello { .. } => {
            Response::error(&EngineError::Validation("hello only opens a connection"))
        }
        Request::Subscribe { .. } => {
            // Handled in the connection loop; reaching here means a caller
            // used execute() directly.
            Response::error(&EngineError::Validation("subscribe requires a connection"))
        }
        Request::ListFloors { include_inactive } => Response::Floors {
            floors: engine.list_floors(include_inactive),
        },
        Request::ListRooms { floor_id } => match engine.list_rooms(floor_id).await {
            Ok(rooms) => Response::Rooms { rooms },
            Err(e) => Response::error(&e),
        },
        Request::GetAvailability { date, floor_id, viewer } => {
            match engine.get_availability(date, floor_id, viewer.as_deref()).await {
                Ok(rooms) => Response::Availability { rooms },
                Err(e) => Response::error(&e),
            }
        }
        Request::GetRoomAvailability { room_id, date, viewer } => {
            match engine.room_availability(room_id, date, viewer.as_deref()).await {
                Ok(availability) => Response::RoomDay { availability },
                Err(e) => Response::error(&e),
            }
        }
        Request::GetDisplayStatus { room_id, date, start, end } => {
            match engine.get_display_status(room_id, date, start, end).await {
                Ok(status) => Response::Status { status },
                Err(e) => Response::error(&e),
            }
        }
        Request::CreateFloor { number, name, layout_ref, actor } => {
            match engine.create_floor(number, name, layout_ref, &actor).await {
                Ok(floor) => Response::Floor { floor },
                Err(e) => Response::error(&e),
            }
        }
        Request::UpdateFloor { id, name, layout_ref, active, actor } => {
            match engine.update_floor(id, name, layout_ref, active, &actor).await {
                Ok(floor) => Response::Floor { floor },
                Err(e) => Response::error(&e),
            }
        }
        Request::CreateRoom {
            floor_id,
            name,
            capacity,
            room_type,
            equipment,
            requires_approval,
            position,
            actor,
        } => {
            match engine
                .create_room(
                    floor_id,
                    name,
                    capacity,
                    room_type,
                    equipment,
                    requires_approval,
                    position,
                    &actor,
                )
                .await
            {
                Ok(room) => Response::Room { room },
                Err(e) => Response::error(&e),
            }
        }
        Request::UpdateRoom {
            id,
            name,
            capacity,
            equipment,
            requires_approval,
            position,
            active,
            actor,
        } => {
            match engine
                .update_room(
                    id,
                    name,
                    capacity,
                    equipment,
                    requires_approval,
                    position,
                    active,
                    &actor,
                )
                .await
            {
                Ok(room) => Response::Room { room },
                Err(e) => Response::error(&e),
            }
        }
        Request::CreateBooking {
            id,
            room_id,
            date,
            start,
            end,
            title,
            purpose,
            visibility,
            description,
            participants,
            requester,
        } => {
            let req = BookingRequest {
                id: id.unwrap_or_else(Ulid::new),
                room_id,
                date,
                start,
                end,
                title,
                purpose,
                visibility,
                description,
                participants,
                requester,
            };
            match engine.create_booking(req).await {
                Ok((booking, message)) => Response::Booking {
                    booking,
                    message: message.to_string(),
                },
                Err(e) => Response::error(&e),
            }
        }
        Request::ApproveBooking { id, actor } => match engine.approve_booking(id, &actor).await {
            Ok(booking) => Response::Booking {
                booking,
                message: "booking approved".to_string(),
            },
            Err(e) => Response::error(&e),
        },
        Request::RejectBooking { id, actor, reason } => {
            match engine.reject_booking(id, &actor, reason).await {
                Ok(booking) => Response::Booking {
                    booking,
                    message: "booking rejected".to_string(),
                },
                Err(e) => Response::error(&e),
            }
        }
        Request::CancelBooking { id, actor, manager } => {
            match engine.cancel_booking(id, &actor, manager).await {
                Ok(booking) => Response::Booking {
                    booking,
                    message: "booking cancelled".to_string(),
                },
                Err(e) => Response::error(&e),
            }
        }
        Request::ListBookings { scope, actor } => Response::Bookings {
            bookings: engine.list_bookings(&actor, scope == Scope::Mine).await,
        },
        Request::ListPendingBookings => Response::Bookings {
            bookings: engine.list_pending_bookings().await,
        },
    }
}
