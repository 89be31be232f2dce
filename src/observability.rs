use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::command::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reserve calls. Labels: tier, outcome.
pub const RESERVATIONS_TOTAL: &str = "roomsched_reservations_total";

/// Counter: rows deleted by remove calls. Labels: tier.
pub const RESERVATIONS_REMOVED_TOTAL: &str = "roomsched_reservations_removed_total";

/// Counter: rows skipped by remove because the caller did not own them.
pub const REMOVALS_UNAUTHORIZED_TOTAL: &str = "roomsched_removals_unauthorized_total";

/// Counter: session commands handled. Labels: command.
pub const COMMANDS_TOTAL: &str = "roomsched_commands_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: seconds spent waiting for gate admission. Labels: tier.
pub const GATE_WAIT_SECONDS: &str = "roomsched_gate_wait_seconds";

/// Counter: gate acquisitions abandoned after the configured timeout. Labels: tier.
pub const GATE_TIMEOUTS_TOTAL: &str = "roomsched_gate_timeouts_total";

/// Counter: notification deliveries. Labels: status.
pub const NOTIFICATIONS_TOTAL: &str = "roomsched_notifications_total";

/// Gauge: active sessions.
pub const CONNECTIONS_ACTIVE: &str = "roomsched_connections_active";

/// Counter: total sessions accepted.
pub const CONNECTIONS_TOTAL: &str = "roomsched_connections_total";

/// Counter: sessions rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomsched_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomsched_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomsched_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
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
        Command::Help => "help",
        Command::Quit => "quit",
        Command::ListRooms => "list_rooms",
        Command::RoomSchedule { .. } => "room_schedule",
        Command::MySchedule => "my_schedule",
        Command::Reserve { .. } => "reserve",
        Command::Remove { .. } => "remove",
    }
}
