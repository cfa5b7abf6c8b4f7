use std::net::SocketAddr;

// ── Booking lifecycle metrics ────────────────────────────────────

/// Counter: reservations opened. Labels: source.
pub const RESERVATIONS_CREATED_TOTAL: &str = "freewheel_reservations_created_total";

/// Counter: holds converted to paid.
pub const RESERVATIONS_PAID_TOTAL: &str = "freewheel_reservations_paid_total";

/// Counter: reservations cancelled. Labels: reason (requested | expired).
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "freewheel_reservations_cancelled_total";

/// Counter: reservations completed.
pub const RESERVATIONS_COMPLETED_TOTAL: &str = "freewheel_reservations_completed_total";

/// Counter: reservations whose return time was extended.
pub const RESERVATIONS_EXTENDED_TOTAL: &str = "freewheel_reservations_extended_total";

/// Counter: claims rejected because a unit was already booked.
pub const BOOKING_CONFLICTS_TOTAL: &str = "freewheel_booking_conflicts_total";

/// Counter: unpaid holds cancelled by the sweeper.
pub const HOLDS_EXPIRED_TOTAL: &str = "freewheel_holds_expired_total";

/// Counter: items handed over / returned at the counter.
pub const ITEMS_CHECKED_OUT_TOTAL: &str = "freewheel_items_checked_out_total";
pub const ITEMS_CHECKED_IN_TOTAL: &str = "freewheel_items_checked_in_total";

// ── Payment gateway metrics ──────────────────────────────────────

/// Counter: successful captures.
pub const PAYMENT_CAPTURES_TOTAL: &str = "freewheel_payment_captures_total";

/// Counter: successful voids (including idempotent re-voids).
pub const PAYMENT_VOIDS_TOTAL: &str = "freewheel_payment_voids_total";

/// Counter: gateway calls that failed or timed out. Labels: op.
pub const GATEWAY_FAILURES_TOTAL: &str = "freewheel_gateway_failures_total";

/// Histogram: gateway call latency in seconds. Labels: op.
pub const GATEWAY_CALL_DURATION_SECONDS: &str = "freewheel_gateway_call_duration_seconds";

// ── Engine internals ─────────────────────────────────────────────

/// Histogram: expiry sweep duration in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "freewheel_sweep_duration_seconds";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "freewheel_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "freewheel_wal_flush_batch_size";

// ── Content cache metrics ────────────────────────────────────────

/// Counter: cache lookups served from a fresh slot.
pub const CONTENT_CACHE_HITS_TOTAL: &str = "freewheel_content_cache_hits_total";

/// Counter: provider fetches (cold misses and TTL refreshes).
pub const CONTENT_CACHE_REFRESHES_TOTAL: &str = "freewheel_content_cache_refreshes_total";

/// Counter: provider failures answered with stale copy.
pub const CONTENT_CACHE_STALE_SERVES_TOTAL: &str = "freewheel_content_cache_stale_serves_total";

/// Counter: provider failures answered with the built-in fallback.
pub const CONTENT_CACHE_FALLBACKS_TOTAL: &str = "freewheel_content_cache_fallbacks_total";

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
