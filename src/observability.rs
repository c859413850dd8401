use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;

// ── Tenant cache ────────────────────────────────────────────────

/// Counter: lookups answered from the in-memory map.
pub const TENANT_CACHE_HITS_TOTAL: &str = "slotwise_tenant_cache_hits_total";

/// Counter: lookups that fell through to the tenant directory.
pub const TENANT_CACHE_MISSES_TOTAL: &str = "slotwise_tenant_cache_misses_total";

/// Counter: periodic reloads that failed and kept the stale map.
pub const TENANT_CACHE_REFRESH_FAILURES_TOTAL: &str = "slotwise_tenant_cache_refresh_failures_total";

/// Gauge: entries currently cached.
pub const TENANTS_CACHED: &str = "slotwise_tenants_cached";

// ── Tenant routing ──────────────────────────────────────────────

/// Counter: namespaces instantiated from the template.
pub const SCHEMAS_CREATED_TOTAL: &str = "slotwise_schemas_created_total";

/// Counter: requests rejected before reaching a handler. Labels: reason.
pub const TENANT_RESOLUTION_FAILURES_TOTAL: &str = "slotwise_tenant_resolution_failures_total";

// ── Booking ─────────────────────────────────────────────────────

/// Counter: availability computations.
pub const SLOT_QUERIES_TOTAL: &str = "slotwise_slot_queries_total";

/// Counter: bookings refused because the slot was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "slotwise_booking_conflicts_total";

// ── HTTP ────────────────────────────────────────────────────────

/// Histogram: request latency in seconds. Labels: method, route, status.
pub const REQUEST_DURATION_SECONDS: &str = "slotwise_request_duration_seconds";

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

/// Records [`REQUEST_DURATION_SECONDS`] per matched route.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    metrics::histogram!(
        REQUEST_DURATION_SECONDS,
        "method" => method,
        "route" => route,
        "status" => response.status().as_u16().to_string(),
    )
    .record(start.elapsed().as_secs_f64());
    response
}
