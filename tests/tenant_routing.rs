mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::json;

use common::*;

#[tokio::test]
async fn request_without_domain_is_rejected() {
    let app = test_app(&[("acme.test", "tenant_acme")]).await;

    let uri = format!("/api/specialists/1/available-slots?date={MONDAY}");
    let (status, body) = app.send(get(None, &uri)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "success": false, "error": "No valid domain found" }));
    assert_eq!(app.backend.checkouts(), 0);
}

#[tokio::test]
async fn unknown_domain_is_not_found() {
    let app = test_app(&[("acme.test", "tenant_acme")]).await;

    let uri = format!("/api/specialists/1/available-slots?date={MONDAY}");
    let (status, body) = app.send(get(Some("nobody.test"), &uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Tenant not found for domain: nobody.test");
}

#[tokio::test]
async fn first_request_instantiates_the_namespace() {
    let app = test_app(&[("acme.test", "tenant_acme")]).await;
    assert!(app.backend.namespace("tenant_acme").is_none());

    let slots = app.slots("acme.test", SEED_SPECIALIST, MONDAY).await;
    assert_eq!(
        slots,
        ["09:00", "10:00", "11:00", "12:00", "13:00", "14:00", "15:00", "16:00"]
    );
    assert!(app.backend.namespace("tenant_acme").is_some());

    // weekend has no working hours
    assert!(app.slots("acme.test", SEED_SPECIALIST, SUNDAY).await.is_empty());
}

#[tokio::test]
async fn origin_header_resolves_like_the_stored_domain() {
    let app = test_app(&[("acme.test", "tenant_acme")]).await;

    let request = Request::builder()
        .uri(format!("/api/specialists/1/available-slots?date={MONDAY}"))
        .header(header::HOST, "internal-lb:8080")
        .header(header::ORIGIN, "https://www.ACME.test")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn every_checkout_is_released() {
    let app = test_app(&[("acme.test", "tenant_acme")]).await;

    app.slots("acme.test", SEED_SPECIALIST, MONDAY).await;
    let (status, _) = app
        .send(get(Some("acme.test"), "/api/specialists/1/available-slots?date=bad"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app
        .send(get(Some("acme.test"), "/api/specialists/abc/available-slots?date=2099-01-05"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app
        .send(get(Some("acme.test"), "/api/specialists/77/available-slots?date=2099-01-05"))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_eq!(app.backend.checkouts(), 4);
    assert_eq!(app.backend.releases(), 4);
}

#[tokio::test]
async fn missing_date_parameter() {
    let app = test_app(&[("acme.test", "tenant_acme")]).await;

    let (status, body) = app
        .send(get(Some("acme.test"), "/api/specialists/1/available-slots"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Date parameter is required (YYYY-MM-DD format)");
}

#[tokio::test]
async fn schema_failure_is_an_opaque_500() {
    let app = test_app(&[("acme.test", "tenant_acme")]).await;
    app.backend.set_namespace_failing(true);

    let uri = format!("/api/specialists/1/available-slots?date={MONDAY}");
    let (status, body) = app.send(get(Some("acme.test"), &uri)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "success": false, "error": "internal server error" }));
    // the half-built namespace was rolled back
    assert!(app.backend.namespace("tenant_acme").is_none());
    assert_eq!(app.backend.checkouts(), 0);
}

#[tokio::test]
async fn tenants_are_isolated() {
    let app = test_app(&[("acme.test", "tenant_acme"), ("globex.test", "tenant_globex")]).await;

    let booking = json!({
        "specialist_id": SEED_SPECIALIST,
        "service_id": SEED_SERVICE,
        "appointment_date": MONDAY,
        "appointment_time": "09:00",
    });
    let (status, body) = app
        .send(with_body(Method::POST, "acme.test", "/api/appointments", booking))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let acme = app.slots("acme.test", SEED_SPECIALIST, MONDAY).await;
    let globex = app.slots("globex.test", SEED_SPECIALIST, MONDAY).await;
    assert!(!acme.contains(&"09:00".to_string()));
    assert!(globex.contains(&"09:00".to_string()));
}

#[tokio::test]
async fn tenant_added_after_startup_is_backfilled() {
    let app = test_app(&[]).await;
    app.backend.add_tenant(9, "Late", "late.test", "tenant_late").await;

    let slots = app.slots("late.test", SEED_SPECIALIST, MONDAY).await;
    assert_eq!(slots.len(), 8);
    assert_eq!(app.backend.directory_lookups(), 1);
    assert_eq!(app.tenants.stats().await.0, 1);
}

#[tokio::test]
async fn untenanted_endpoints() {
    let app = test_app(&[("acme.test", "tenant_acme")]).await;

    let (status, body) = app.send(get(None, "/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = app.send(get(None, "/internal/tenant-cache")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 1);
    assert_eq!(body["data"]["domains"], json!(["acme.test"]));
    assert_eq!(body["data"]["running"], true);
    assert_eq!(body["data"]["tenants"][0]["domain"], "acme.test");
    assert_eq!(body["data"]["tenants"][0]["schema"], "tenant_acme");

    app.backend.add_tenant(2, "Globex", "globex.test", "tenant_globex").await;
    let refresh = Request::builder()
        .method(Method::POST)
        .uri("/internal/tenant-cache/refresh")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(refresh).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 2);

    app.backend.set_directory_failing(true);
    let refresh = Request::builder()
        .method(Method::POST)
        .uri("/internal/tenant-cache/refresh")
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(refresh).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    // stale map kept
    assert_eq!(app.tenants.stats().await.0, 2);
}
