use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings created. Labels: mode.
pub const BOOKINGS_CREATED_TOTAL: &str = "curbd_bookings_created_total";

/// Counter: bookings swapped to a new slot.
pub const BOOKINGS_SWAPPED_TOTAL: &str = "curbd_bookings_swapped_total";

/// Counter: offer searches served.
pub const OFFER_SEARCHES_TOTAL: &str = "curbd_offer_searches_total";

// ── Periodic-engine metrics ─────────────────────────────────────

/// Counter: dynamic price adjustments written.
pub const PRICE_ADJUSTMENTS_TOTAL: &str = "curbd_price_adjustments_total";

/// Counter: outbox events published downstream.
pub const OUTBOX_PUBLISHED_TOTAL: &str = "curbd_outbox_published_total";

/// Counter: outbox events that failed to publish (marked error).
pub const OUTBOX_ERRORS_TOTAL: &str = "curbd_outbox_errors_total";

/// Counter: incentive alerts raised.
pub const ALERTS_RAISED_TOTAL: &str = "curbd_alerts_raised_total";

/// Counter: forecast rows scored and upserted.
pub const FORECAST_ROWS_TOTAL: &str = "curbd_forecast_rows_total";

/// Histogram: oracle scoring latency in seconds.
pub const ORACLE_LATENCY_SECONDS: &str = "curbd_oracle_latency_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "curbd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (commits per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "curbd_wal_flush_batch_size";

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
