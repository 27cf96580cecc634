use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: protocol commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "seatlock_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "seatlock_command_duration_seconds";

/// Counter: booking state transitions. Labels: outcome.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "seatlock_booking_transitions_total";

/// Counter: booking requests rejected because a seat was taken.
pub const SEAT_CONFLICTS_TOTAL: &str = "seatlock_seat_conflicts_total";

/// Histogram: payment capture latency in seconds. Labels: outcome.
pub const PAYMENT_DURATION_SECONDS: &str = "seatlock_payment_duration_seconds";

/// Counter: refunds that failed after a cancellation.
pub const REFUND_FAILURES_TOTAL: &str = "seatlock_refund_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: holds currently awaiting payment.
pub const HOLDS_ACTIVE: &str = "seatlock_holds_active";

/// Counter: holds expired by the sweeper or on confirm.
pub const HOLDS_EXPIRED_TOTAL: &str = "seatlock_holds_expired_total";

/// Gauge: shows loaded.
pub const SHOWS_ACTIVE: &str = "seatlock_shows_active";

/// Gauge: open protocol connections.
pub const CONNECTIONS_ACTIVE: &str = "seatlock_connections_active";

/// Counter: connections accepted.
pub const CONNECTIONS_TOTAL: &str = "seatlock_connections_total";

/// Counter: connections rejected due to the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "seatlock_connections_rejected_total";

/// Histogram: ledger log group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "seatlock_wal_flush_duration_seconds";

/// Histogram: ledger log group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "seatlock_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a protocol request to a short label for metrics.
pub fn command_label(req: &Request) -> &'static str {
    match req {
        Request::RequestBooking { .. } => "request_booking",
        Request::ConfirmBooking { .. } => "confirm_booking",
        Request::CancelBooking { .. } => "cancel_booking",
        Request::GetBooking { .. } => "get_booking",
        Request::ListBookings { .. } => "list_bookings",
        Request::SeatMap { .. } => "seat_map",
        Request::ListShows => "list_shows",
        Request::Watch { .. } => "watch",
        Request::Unwatch { .. } => "unwatch",
    }
}
