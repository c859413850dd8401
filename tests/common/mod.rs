#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use slotwise::api::{self, AppState};
use slotwise::schema::SchemaInstantiator;
use slotwise::store::memory::MemoryBackend;
use slotwise::tenant::TenantCache;

// 2099-01-05 is a Monday; the seeded specialist works Mon–Fri 09:00–17:00.
pub const MONDAY: &str = "2099-01-05";
pub const SUNDAY: &str = "2099-01-04";

/// Ids handed out by the in-memory seed: the specialist comes first, then
/// its five working-hour rows, then three services.
pub const SEED_SPECIALIST: i32 = 1;
pub const SEED_SERVICE: i32 = 7;
pub const SEED_SERVICE_PRICE: f64 = 200.0;

pub struct TestApp {
    pub router: Router,
    pub backend: Arc<MemoryBackend>,
    pub tenants: Arc<TenantCache>,
}

/// Router over an in-memory backend with the given `(domain, schema)`
/// tenants registered. Namespaces are not created up front.
pub async fn test_app(tenants: &[(&str, &str)]) -> TestApp {
    let backend = Arc::new(MemoryBackend::new());
    for (i, (domain, schema)) in tenants.iter().enumerate() {
        backend.add_tenant(i as i32 + 1, domain, domain, schema).await;
    }
    let cache = Arc::new(TenantCache::new(backend.clone(), Duration::from_secs(300)));
    cache.start().await.unwrap();

    let state = AppState {
        tenants: cache.clone(),
        schemas: Arc::new(SchemaInstantiator::new(backend.clone())),
        sessions: backend.clone(),
    };
    TestApp {
        router: api::router(state),
        backend,
        tenants: cache,
    }
}

pub fn get(domain: Option<&str>, uri: &str) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(domain) = domain {
        builder = builder.header(header::HOST, domain);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn with_body(method: Method, domain: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, domain)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    pub async fn slots(&self, domain: &str, specialist: i32, date: &str) -> Vec<String> {
        let uri = format!("/api/specialists/{specialist}/available-slots?date={date}");
        let (status, body) = self.send(get(Some(domain), &uri)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        serde_json::from_value(body["data"].clone()).unwrap()
    }
}
