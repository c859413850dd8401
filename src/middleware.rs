use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, Instrument};

use crate::api::AppState;
use crate::domain;
use crate::error::ApiError;
use crate::model::TenantCacheEntry;
use crate::store::TenantSession;

/// Request extension set by [`resolve_tenant`]: the resolved tenant and a
/// session whose namespace is that tenant's schema.
#[derive(Clone)]
pub struct TenantContext {
    pub tenant: TenantCacheEntry,
    pub session: Arc<dyn TenantSession>,
}

fn rejected(reason: &'static str, err: ApiError) -> ApiError {
    metrics::counter!(crate::observability::TENANT_RESOLUTION_FAILURES_TOTAL, "reason" => reason)
        .increment(1);
    err
}

/// Resolve the tenant from the request's domain, make sure its namespace
/// exists, then run the handler against a session bound to that namespace.
/// The session is released once the handler's response is produced.
pub async fn resolve_tenant(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(domain) = domain::from_request(request.headers(), request.uri()) else {
        return Err(rejected(
            "no_domain",
            ApiError::BadRequest("No valid domain found".into()),
        ));
    };

    let tenant = match state.tenants.lookup(&domain).await {
        Ok(tenant) => tenant,
        Err(e) => {
            let reason = match e {
                ApiError::NotFound(_) => "unknown_tenant",
                _ => "directory",
            };
            return Err(rejected(reason, e));
        }
    };

    if let Err(e) = state.schemas.ensure_schema(&tenant.schema).await {
        return Err(rejected(
            "schema",
            ApiError::Internal(format!("failed to prepare schema {}: {e}", tenant.schema)),
        ));
    }

    let session: Arc<dyn TenantSession> = match state.sessions.checkout(&tenant.schema).await {
        Ok(session) => Arc::from(session),
        Err(e) => {
            return Err(rejected(
                "checkout",
                ApiError::Internal(format!("failed to bind schema {}: {e}", tenant.schema)),
            ));
        }
    };
    debug!("request bound to tenant {} ({})", tenant.domain, session.schema());

    let span = tracing::info_span!("tenant", domain = %tenant.domain, schema = %session.schema());
    request.extensions_mut().insert(TenantContext {
        tenant,
        session: session.clone(),
    });

    let response = next.run(request).instrument(span).await;
    session.release().await;
    Ok(response)
}
