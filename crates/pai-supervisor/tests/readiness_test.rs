//! Tests for readiness gating against real HTTP listeners

mod common;

use axum::{http::StatusCode, routing::get, Router};
use pai_supervisor::dependency::{ReadinessConfig, ReadinessGate, ServiceHealth};
use std::time::{Duration, Instant};

fn gate() -> ReadinessGate {
    ReadinessGate::new(ReadinessConfig {
        poll_interval: Duration::from_millis(100),
        probe_timeout: Duration::from_millis(500),
        verbose_logging: true,
    })
    .unwrap()
}

#[tokio::test]
async fn test_unreachable_fails_no_earlier_than_timeout() {
    let url = format!("http://127.0.0.1:{}/", common::unused_port());
    let timeout = Duration::from_millis(800);

    let start = Instant::now();
    let ready = gate().wait_until_ready("qdrant", &url, timeout).await;

    assert!(!ready);
    assert!(start.elapsed() >= timeout);
    assert!(start.elapsed() < timeout + Duration::from_secs(2));
}

#[tokio::test]
async fn test_delayed_listener_becomes_ready() {
    let port = common::unused_port();
    let url = format!("http://127.0.0.1:{port}/");

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(600)).await;
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let router = Router::new().route("/", get(|| async { "ok" }));
        axum::serve(listener, router).await.unwrap();
    });

    let start = Instant::now();
    let ready = gate()
        .wait_until_ready("pai-backend", &url, Duration::from_secs(10))
        .await;

    assert!(ready);
    assert!(start.elapsed() >= Duration::from_millis(500));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_error_status_still_counts_as_reachable() {
    let router = Router::new().route("/", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
    let addr = common::spawn_http(router).await;
    let url = format!("http://{addr}/");

    let probe = gate().probe(&url).await;
    assert_eq!(probe.status, ServiceHealth::Reachable(503));
    assert!(probe.is_reachable());

    let start = Instant::now();
    assert!(gate().wait_until_ready("qdrant", &url, Duration::from_secs(5)).await);
    assert!(start.elapsed() < Duration::from_secs(1));
}
