use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "covers_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "covers_query_duration_seconds";

/// Counter: bookings rejected because the slot was taken or full.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "covers_reservation_conflicts_total";

/// Histogram: time spent computing one availability answer, in seconds.
pub const AVAILABILITY_DURATION_SECONDS: &str = "covers_availability_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "covers_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "covers_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "covers_connections_rejected_total";

/// Gauge: number of loaded restaurants.
pub const TENANTS_ACTIVE: &str = "covers_tenants_active";

/// Counter: staff-only commands attempted without the admin login.
pub const PERMISSION_DENIED_TOTAL: &str = "covers_permission_denied_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "covers_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "covers_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertTable { .. } => "insert_table",
        Command::UpdateTable { .. } => "update_table",
        Command::DeleteTable { .. } => "delete_table",
        Command::SelectTables { .. } => "select_tables",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateReservationStatus { .. } => "update_reservation_status",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::SelectReservation { .. } => "select_reservation",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectBookableDates => "select_bookable_dates",
        Command::SelectSettings => "select_settings",
        Command::UpdateSettings { .. } => "update_settings",
        Command::InsertExceptionDate { .. } => "insert_exception_date",
        Command::DeleteExceptionDate { .. } => "delete_exception_date",
        Command::SelectExceptionDates { .. } => "select_exception_dates",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
