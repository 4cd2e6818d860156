//! Integration tests for the collector API endpoints

#[path = "../src/api.rs"]
#[allow(dead_code)]
mod api;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use collector_lib::{
    health::{components, HealthRegistry},
    observability::CollectorMetrics,
};
use std::sync::Arc;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<api::AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::SCRAPER).await;
    health_registry.register(components::PROCESSORS).await;
    health_registry.register(components::EXPORTER).await;

    let state = Arc::new(api::AppState::new(health_registry));
    let router = api::create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_degraded(components::SCRAPER, "1 of 3 sources failed")
        .await;

    let (status, body) = get(app, "/healthz").await;

    // Degraded is still operational
    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"]["scraper"]["message"],
        "1 of 3 sources failed"
    );
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_unhealthy(components::EXPORTER, "sink unreachable")
        .await;

    let (status, body) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_until_caches_sync() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_degraded(components::KUBE_CACHE, "Waiting for initial pod and workload lists")
        .await;

    let (status, body) = get(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_healthy(components::KUBE_CACHE).await;
    state.health_registry.set_ready(true).await;

    let (status, body) = get(app, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_readyz_returns_503_when_ready_but_unhealthy() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;
    state
        .health_registry
        .set_unhealthy(components::PROCESSORS, "Failed")
        .await;

    let (status, _) = get(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state) = setup_test_app().await;
    let metrics = CollectorMetrics::new();
    metrics.observe_cycle_latency(0.05);
    metrics.set_sets_exported(12);
    metrics.inc_cycles_dropped();

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("kube_collector_cycle_latency_seconds_bucket"));
    assert!(metrics_text.contains("kube_collector_sets_exported 12"));
    assert!(metrics_text.contains("kube_collector_cycles_dropped_total"));
}

#[tokio::test]
async fn test_healthz_includes_component_details() {
    let (app, _state) = setup_test_app().await;

    let (_, body) = get(app, "/healthz").await;

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(health["components"].is_object());
    assert!(health["components"]["scraper"].is_object());
    assert!(health["components"]["processors"].is_object());
    assert!(health["components"]["exporter"].is_object());
}
