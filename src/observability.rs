use std::net::SocketAddr;

// ── Pass metrics ────────────────────────────────────────────────

/// Counter: reconciliation passes. Labels: result (ok, booking_error).
pub const PASSES_TOTAL: &str = "roomwatch_passes_total";

/// Histogram: wall time of one pass in seconds.
pub const PASS_DURATION_SECONDS: &str = "roomwatch_pass_duration_seconds";

/// Counter: bookings received from the platform, before filtering.
pub const BOOKINGS_FETCHED_TOTAL: &str = "roomwatch_bookings_fetched_total";

/// Counter: calendar feeds that failed. Labels: calendar.
pub const CALENDAR_FAILURES_TOTAL: &str = "roomwatch_calendar_failures_total";

/// Counter: overlaps detected. Labels: calendar.
pub const OVERLAPS_TOTAL: &str = "roomwatch_overlaps_total";

// ── Notification metrics ────────────────────────────────────────

/// Counter: notification attempts. Labels: outcome
/// (sent, fallback, suppressed, already_notified, config_error, send_error).
pub const NOTIFICATIONS_TOTAL: &str = "roomwatch_notifications_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
/// A failed install is logged and the daemon keeps running.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter on {addr}: {e}"),
    }
}
