use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "tablecap_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "tablecap_query_duration_seconds";

// ── Domain verdicts ─────────────────────────────────────────────

/// Counter: date feasibility verdicts. Labels: reason ("feasible" or a reason code).
pub const FEASIBILITY_VERDICTS_TOTAL: &str = "tablecap_feasibility_verdicts_total";

/// Counter: modification eligibility verdicts. Labels: reason ("eligible" or a reason code).
pub const ELIGIBILITY_VERDICTS_TOTAL: &str = "tablecap_eligibility_verdicts_total";

/// Counter: month grid cache lookups. Labels: result (hit, miss).
pub const CALENDAR_CACHE_TOTAL: &str = "tablecap_calendar_cache_total";

/// Counter: failed reservation store reads. Labels: table.
pub const STORE_READ_FAILURES_TOTAL: &str = "tablecap_store_read_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "tablecap_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "tablecap_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tablecap_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "tablecap_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tablecap_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tablecap_wal_flush_batch_size";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "tablecap_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SetDailyLimit { .. } => "set_daily_limit",
        Command::ClearDailyLimit { .. } => "clear_daily_limit",
        Command::SetHourSet { .. } => "set_hour_set",
        Command::ClearHourSet { .. } => "clear_hour_set",
        Command::SetHourAllocation { .. } => "set_hour_allocation",
        Command::ClearHourAllocation { .. } => "clear_hour_allocation",
        Command::SaveHourConfiguration { .. } => "save_hour_configuration",
        Command::ClearHourConfiguration { .. } => "clear_hour_configuration",
        Command::SetDayOpen { .. } => "set_day_open",
        Command::ClearDayOverride { .. } => "clear_day_override",
        Command::InsertBooking { .. } => "insert_booking",
        Command::BatchInsertBookings { .. } => "batch_insert_bookings",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::AppendModification { .. } => "append_modification",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectAvailableSlots { .. } => "select_available_slots",
        Command::SelectDateFeasibility { .. } => "select_date_feasibility",
        Command::SelectModificationEligibility { .. } => "select_modification_eligibility",
        Command::SelectPartySizeChange { .. } => "select_party_size_change",
        Command::SelectBookingWindow { .. } => "select_booking_window",
        Command::SelectMonthGrid { .. } => "select_month_grid",
        Command::SelectHourPercentages { .. } => "select_hour_percentages",
        Command::SelectDayStatus { .. } => "select_day_status",
    }
}
