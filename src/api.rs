use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{middleware, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::booking::{self, BookingRequest, RescheduleRequest};
use crate::error::ApiError;
use crate::middleware::{resolve_tenant, TenantContext};
use crate::schema::SchemaInstantiator;
use crate::store::SessionFactory;
use crate::tenant::TenantCache;
use crate::{availability, observability};

/// Shared handles injected into every handler and the tenant middleware.
#[derive(Clone)]
pub struct AppState {
    pub tenants: Arc<TenantCache>,
    pub schemas: Arc<SchemaInstantiator>,
    pub sessions: Arc<dyn SessionFactory>,
}

type ApiResult = Result<Json<Value>, ApiError>;

fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

fn parse_id(raw: &str, what: &str) -> Result<i32, ApiError> {
    raw.parse::<i32>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid {what} ID")))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(v)| v)
        .map_err(|_| ApiError::BadRequest("Invalid request format".into()))
}

pub fn router(state: AppState) -> Router {
    let tenant_routes = Router::new()
        .route("/api/specialists/{id}/available-slots", get(available_slots))
        .route("/api/appointments", post(create_appointment))
        .route("/api/appointments/{id}", put(reschedule_appointment))
        .route("/api/appointments/{id}/cancel", put(cancel_appointment))
        .route("/api/admin/appointments/{id}/status", put(update_status))
        .route(
            "/api/admin/appointments/{id}/payment-status",
            put(update_payment_status),
        )
        .route(
            "/api/admin/settings/appointment-duration",
            put(set_appointment_duration),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), resolve_tenant));

    Router::new()
        .route("/health", get(health))
        .route("/internal/tenant-cache", get(cache_stats))
        .route("/internal/tenant-cache/refresh", post(refresh_cache))
        .merge(tenant_routes)
        .layer(middleware::from_fn(observability::track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Untenanted ──────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn cache_stats(State(state): State<AppState>) -> Json<Value> {
    let (count, domains) = state.tenants.stats().await;
    ok(json!({
        "count": count,
        "domains": domains,
        "tenants": state.tenants.snapshot().await,
        "running": state.tenants.is_running().await,
        "refresh_interval_secs": state.tenants.refresh_interval().as_secs(),
    }))
}

async fn refresh_cache(State(state): State<AppState>) -> ApiResult {
    let count = state
        .tenants
        .refresh()
        .await
        .map_err(|e| ApiError::Internal(format!("tenant cache refresh failed: {e}")))?;
    Ok(ok(json!({ "count": count })))
}

// ── Tenant-scoped ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SlotQuery {
    date: Option<String>,
}

async fn available_slots(
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
    Query(query): Query<SlotQuery>,
) -> ApiResult {
    let specialist_id = parse_id(&id, "specialist")?;
    let date = query
        .date
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Date parameter is required (YYYY-MM-DD format)".into()))?;
    let slots = availability::available_slots(ctx.session.as_ref(), specialist_id, &date).await?;
    Ok(ok(slots))
}

async fn create_appointment(
    Extension(ctx): Extension<TenantContext>,
    payload: Result<Json<BookingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request = body(payload)?;
    let now = chrono::Local::now().naive_local();
    let appointment = booking::create_appointment(ctx.session.as_ref(), request, now).await?;
    Ok((StatusCode::CREATED, ok(appointment)))
}

async fn reschedule_appointment(
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
    payload: Result<Json<RescheduleRequest>, JsonRejection>,
) -> ApiResult {
    let id = parse_id(&id, "appointment")?;
    let request = body(payload)?;
    let appointment = booking::reschedule_appointment(ctx.session.as_ref(), id, request).await?;
    Ok(ok(appointment))
}

async fn cancel_appointment(
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = parse_id(&id, "appointment")?;
    let appointment = booking::cancel_appointment(ctx.session.as_ref(), id).await?;
    Ok(ok(appointment))
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

async fn update_status(
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
    payload: Result<Json<StatusBody>, JsonRejection>,
) -> ApiResult {
    let id = parse_id(&id, "appointment")?;
    let StatusBody { status } = body(payload)?;
    let appointment = booking::update_status(ctx.session.as_ref(), id, &status).await?;
    Ok(ok(appointment))
}

#[derive(Debug, Deserialize)]
struct PaymentStatusBody {
    payment_status: String,
}

async fn update_payment_status(
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
    payload: Result<Json<PaymentStatusBody>, JsonRejection>,
) -> ApiResult {
    let id = parse_id(&id, "appointment")?;
    let PaymentStatusBody { payment_status } = body(payload)?;
    let appointment =
        booking::update_payment_status(ctx.session.as_ref(), id, &payment_status).await?;
    Ok(ok(appointment))
}

#[derive(Debug, Deserialize)]
struct DurationBody {
    minutes: i64,
}

async fn set_appointment_duration(
    Extension(ctx): Extension<TenantContext>,
    payload: Result<Json<DurationBody>, JsonRejection>,
) -> ApiResult {
    let DurationBody { minutes } = body(payload)?;
    let minutes = booking::set_appointment_duration(ctx.session.as_ref(), minutes).await?;
    Ok(ok(json!({ "appointment_duration": minutes })))
}
