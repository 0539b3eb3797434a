use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_test::assert_ok;
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use roomd::audit::TracingAudit;
use roomd::engine::{Engine, RoomFlagGate};
use roomd::model::{BookingStatus, BusinessHours, DisplayStatus};
use roomd::notify::NotifyHub;
use roomd::proto::Response;
use roomd::wire;

// ── Test infrastructure ──────────────────────────────────────

const TOKEN: &str = "test-token";

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("roomd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(
        Engine::new(
            dir.join("roomd.wal"),
            Arc::new(NotifyHub::new()),
            Arc::new(TracingAudit),
            Arc::new(RoomFlagGate),
            BusinessHours::default(),
        )
        .unwrap(),
    );

    let srv_engine = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = srv_engine.clone();
            tokio::spawn(async move {
                wire::process_connection(socket, engine, TOKEN.into()).await;
            });
        }
    });

    (addr, engine)
}

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
}

impl Client {
    /// Connect and run the hello handshake.
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(64 * 1024));
        framed
            .send(format!(r#"{{"op":"hello","token":"{TOKEN}"}}"#))
            .await
            .unwrap();
        let mut client = Self { framed };
        match client.recv().await {
            Response::Ok => {}
            other => panic!("handshake failed: {other:?}"),
        }
        client
    }

    async fn send(&mut self, json: &str) {
        // One request per frame: an embedded newline would split the line
        // codec into two garbage frames.
        assert!(!json.contains('\n'), "request must be a single line: {json}");
        self.framed.send(json.to_string()).await.unwrap();
    }

    async fn recv(&mut self) -> Response {
        let line = tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("response timeout")
            .expect("connection closed")
            .expect("framing error");
        serde_json::from_str(&line).expect("bad response json")
    }

    async fn request(&mut self, json: &str) -> Response {
        self.send(json).await;
        self.recv().await
    }
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn rejects_bad_token() {
    let (addr, _engine) = start_test_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, LinesCodec::new());
    framed
        .send(r#"{"op":"hello","token":"wrong"}"#.to_string())
        .await
        .unwrap();
    let line = framed.next().await.unwrap().unwrap();
    let resp: Response = serde_json::from_str(&line).unwrap();
    match resp {
        Response::Err { error } => assert_eq!(error.code, "unauthorized"),
        other => panic!("expected error, got {other:?}"),
    }
    // Server closes after a failed handshake
    assert!(framed.next().await.is_none());
}

#[tokio::test]
async fn full_booking_flow_over_the_wire() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let floor = match client
        .request(r#"{"op":"create_floor","number":1,"name":"First","actor":"ops"}"#)
        .await
    {
        Response::Floor { floor } => floor,
        other => panic!("unexpected: {other:?}"),
    };

    let room = match client
        .request(&format!(
            r#"{{"op":"create_room","floor_id":"{}","name":"A-101","capacity":8,"actor":"ops"}}"#,
            floor.id
        ))
        .await
    {
        Response::Room { room } => room,
        other => panic!("unexpected: {other:?}"),
    };
    assert!(!room.requires_approval);

    // 09:00-10:00 booked on a room without an approval gate
    let booking = match client
        .request(&format!(
            r#"{{"op":"create_booking","room_id":"{}","date":"2025-06-02","start":540,"end":600,"title":"Standup","requester":"alice"}}"#,
            room.id
        ))
        .await
    {
        Response::Booking { booking, message } => {
            assert_eq!(message, "booking confirmed");
            booking
        }
        other => panic!("unexpected: {other:?}"),
    };
    assert_eq!(booking.status, BookingStatus::Approved);

    // 09:30-10:30 collides and names the winner
    match client
        .request(&format!(
            r#"{{"op":"create_booking","room_id":"{}","date":"2025-06-02","start":570,"end":630,"title":"Retro","requester":"bob"}}"#,
            room.id
        ))
        .await
    {
        Response::Err { error } => {
            assert_eq!(error.code, "conflict");
            assert_eq!(error.conflict_id, Some(booking.id));
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    // Availability shows the hole
    match client
        .request(&format!(
            r#"{{"op":"get_room_availability","room_id":"{}","date":"2025-06-02"}}"#,
            room.id
        ))
        .await
    {
        Response::RoomDay { availability } => {
            assert_eq!(availability.bookings.len(), 1);
            assert_eq!(availability.free.len(), 2);
        }
        other => panic!("unexpected: {other:?}"),
    }

    // Point status for a boundary-touching window is available
    match client
        .request(&format!(
            r#"{{"op":"get_display_status","room_id":"{}","date":"2025-06-02","start":600,"end":660}}"#,
            room.id
        ))
        .await
    {
        Response::Status { status } => assert_eq!(status, DisplayStatus::Available),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn approval_flow_with_subscription() {
    let (addr, engine) = start_test_server().await;
    let mut manager = Client::connect(addr).await;
    let mut watcher = Client::connect(addr).await;

    let floor = match manager
        .request(r#"{"op":"create_floor","number":1,"name":"First","actor":"ops"}"#)
        .await
    {
        Response::Floor { floor } => floor,
        other => panic!("unexpected: {other:?}"),
    };
    let room = match manager
        .request(&format!(
            r#"{{"op":"create_room","floor_id":"{}","name":"VIP-1","capacity":4,"room_type":"vip","requires_approval":true,"actor":"ops"}}"#,
            floor.id
        ))
        .await
    {
        Response::Room { room } => room,
        other => panic!("unexpected: {other:?}"),
    };

    assert_ok!(
        serde_json::to_string(&room),
        "room must serialize for the subscribe frame"
    );
    match watcher
        .request(&format!(r#"{{"op":"subscribe","room_id":"{}"}}"#, room.id))
        .await
    {
        Response::Ok => {}
        other => panic!("unexpected: {other:?}"),
    }

    let booking = match manager
        .request(&format!(
            r#"{{"op":"create_booking","room_id":"{}","date":"2025-06-02","start":540,"end":600,"title":"Exec sync","requester":"alice"}}"#,
            room.id
        ))
        .await
    {
        Response::Booking { booking, message } => {
            assert_eq!(message, "booking awaiting approval");
            booking
        }
        other => panic!("unexpected: {other:?}"),
    };
    assert_eq!(booking.status, BookingStatus::Pending);

    // The pending queue sees it
    match manager.request(r#"{"op":"list_pending_bookings"}"#).await {
        Response::Bookings { bookings } => {
            assert_eq!(bookings.len(), 1);
            assert_eq!(bookings[0].id, booking.id);
        }
        other => panic!("unexpected: {other:?}"),
    }

    match manager
        .request(&format!(
            r#"{{"op":"approve_booking","id":"{}","actor":"manager"}}"#,
            booking.id
        ))
        .await
    {
        Response::Booking { booking: approved, .. } => {
            assert_eq!(approved.status, BookingStatus::Approved);
            assert_eq!(approved.approver.as_deref(), Some("manager"));
        }
        other => panic!("unexpected: {other:?}"),
    }

    // The watcher sees both transitions as pushed frames
    match watcher.recv().await {
        Response::Event { room_id, .. } => assert_eq!(room_id, room.id),
        other => panic!("expected event, got {other:?}"),
    }
    match watcher.recv().await {
        Response::Event { room_id, .. } => assert_eq!(room_id, room.id),
        other => panic!("expected event, got {other:?}"),
    }

    // Engine-side view agrees with what went over the wire
    assert!(engine.list_pending_bookings().await.is_empty());
}

#[tokio::test]
async fn malformed_requests_get_validation_errors() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    match client.request(r#"{"op":"no_such_op"}"#).await {
        Response::Err { error } => assert_eq!(error.code, "validation"),
        other => panic!("unexpected: {other:?}"),
    }
    match client.request("not json at all").await {
        Response::Err { error } => assert_eq!(error.code, "validation"),
        other => panic!("unexpected: {other:?}"),
    }

    // Connection still usable afterwards
    match client.request(r#"{"op":"list_floors"}"#).await {
        Response::Floors { floors } => assert!(floors.is_empty()),
        other => panic!("unexpected: {other:?}"),
    }
}
