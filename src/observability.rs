use std::net::SocketAddr;

use crate::proto::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests executed. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "roomd_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "roomd_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roomd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roomd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomd_connections_rejected_total";

/// Counter: handshake failures (bad token or malformed hello).
pub const AUTH_FAILURES_TOTAL: &str = "roomd_auth_failures_total";

/// Counter: pending bookings auto-rejected by the expiry sweep.
pub const PENDING_EXPIRED_TOTAL: &str = "roomd_pending_expired_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Request variant to a short label for metrics.
pub fn op_label(req: &Request) -> &'static str {
    match req {
        Request::Hello { .. } => "hello",
        Request::ListFloors { .. } => "list_floors",
        Request::ListRooms { .. } => "list_rooms",
        Request::GetAvailability { .. } => "get_availability",
        Request::GetRoomAvailability { .. } => "get_room_availability",
        Request::GetDisplayStatus { .. } => "get_display_status",
        Request::CreateFloor { .. } => "create_floor",
        Request::UpdateFloor { .. } => "update_floor",
        Request::CreateRoom { .. } => "create_room",
        Request::UpdateRoom { .. } => "update_room",
        Request::CreateBooking { .. } => "create_booking",
        Request::ApproveBooking { .. } => "approve_booking",
        Request::RejectBooking { .. } => "reject_booking",
        Request::CancelBooking { .. } => "cancel_booking",
        Request::ListBookings { .. } => "list_bookings",
        Request::ListPendingBookings => "list_pending_bookings",
        Request::Subscribe { .. } => "subscribe",
    }
}
