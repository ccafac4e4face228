//! Integration tests for edge/cloud routing.
//!
//! Edge and cloud locations are wiremock servers whose `/health` answers
//! are scripted per test, so every strategy can be driven through healthy,
//! unhealthy, and slow endpoints.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fleet_dispatch::routing::router::{NO_HEALTHY_ENDPOINTS, OFF_GRID_FORCES_EDGE};
use fleet_dispatch::routing::{LocationConfig, RoutingError};
use fleet_dispatch::{
    Backend, Coordinator, DispatchConfig, OperatingMode, RequestProfile, RouteStrategy,
};

// ── Helper functions ──────────────────────────────────────────────

async fn location(status: u16, delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(status)
                .set_body_json(json!({"status": "ok"}))
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    server
}

async fn healthy() -> MockServer {
    location(200, Duration::ZERO).await
}

async fn unhealthy() -> MockServer {
    location(503, Duration::ZERO).await
}

fn coordinator(
    strategy: RouteStrategy,
    edge: &MockServer,
    cloud: &MockServer,
    fallback_enabled: bool,
) -> Coordinator {
    let mut config = DispatchConfig::default();
    config.health.probe_timeout_ms = 2_000;
    config.routing.strategy = strategy;
    config.routing.fallback_enabled = fallback_enabled;
    config.routing.edge = LocationConfig {
        endpoint: edge.uri(),
    };
    config.routing.cloud = LocationConfig {
        endpoint: cloud.uri(),
    };
    Coordinator::new(&config).expect("coordinator must build in tests")
}

fn profile() -> RequestProfile {
    RequestProfile::new("llm")
}

async fn health_hits(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/health")
        .count()
}

// ── edge_first / cloud_first ──────────────────────────────────────

#[tokio::test]
async fn test_edge_first_healthy_edge_is_chosen() {
    let (edge, cloud) = (healthy().await, healthy().await);
    let c = coordinator(RouteStrategy::EdgeFirst, &edge, &cloud, true);

    let d = c.route_request(&profile(), OperatingMode::Connected).await;
    assert_eq!(d.location, "edge");
    assert_eq!(d.endpoint, edge.uri());
    assert!(!d.degraded);
    assert!(d.latency.is_some());
    assert_eq!(health_hits(&cloud).await, 0);
}

#[tokio::test]
async fn test_edge_first_falls_back_to_cloud() {
    let (edge, cloud) = (unhealthy().await, healthy().await);
    let c = coordinator(RouteStrategy::EdgeFirst, &edge, &cloud, true);

    let d = c.route_request(&profile(), OperatingMode::Connected).await;
    assert_eq!(d.location, "cloud");
    assert_eq!(d.endpoint, cloud.uri());
    assert!(!d.degraded);
    assert!(d.justification.contains("falling back"));
}

#[tokio::test]
async fn test_edge_first_without_fallback_degrades_to_edge() {
    let (edge, cloud) = (unhealthy().await, healthy().await);
    let c = coordinator(RouteStrategy::EdgeFirst, &edge, &cloud, false);

    let d = c.route_request(&profile(), OperatingMode::Connected).await;
    assert_eq!(d.location, "edge");
    assert!(d.degraded);
    assert_eq!(d.justification, NO_HEALTHY_ENDPOINTS);
    assert_eq!(health_hits(&cloud).await, 0);
}

#[tokio::test]
async fn test_cloud_first_prefers_cloud_and_falls_back_to_edge() {
    let (edge, cloud) = (healthy().await, healthy().await);
    let c = coordinator(RouteStrategy::CloudFirst, &edge, &cloud, true);
    let d = c.route_request(&profile(), OperatingMode::Connected).await;
    assert_eq!(d.location, "cloud");

    let (edge, cloud) = (healthy().await, unhealthy().await);
    let c = coordinator(RouteStrategy::CloudFirst, &edge, &cloud, true);
    let d = c.route_request(&profile(), OperatingMode::Connected).await;
    assert_eq!(d.location, "edge");
    assert!(!d.degraded);
}

#[tokio::test]
async fn test_all_unhealthy_returns_degraded_decision_not_error() {
    let (edge, cloud) = (unhealthy().await, unhealthy().await);
    let c = coordinator(RouteStrategy::CloudFirst, &edge, &cloud, true);

    let d = c.route_request(&profile(), OperatingMode::Connected).await;
    assert_eq!(d.location, "cloud");
    assert!(d.degraded);
    assert_eq!(d.justification, NO_HEALTHY_ENDPOINTS);
}

#[tokio::test]
async fn test_cached_strategies_reuse_recent_probe() {
    let (edge, cloud) = (healthy().await, healthy().await);
    let c = coordinator(RouteStrategy::EdgeFirst, &edge, &cloud, true);

    c.route_request(&profile(), OperatingMode::Connected).await;
    c.route_request(&profile(), OperatingMode::Connected).await;
    c.route_request(&profile(), OperatingMode::Connected).await;
    assert_eq!(health_hits(&edge).await, 1);
}

// ── balanced ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_balanced_picks_lower_latency() {
    let edge = location(200, Duration::from_millis(300)).await;
    let cloud = healthy().await;
    let c = coordinator(RouteStrategy::Balanced, &edge, &cloud, true);

    let d = c.route_request(&profile(), OperatingMode::Connected).await;
    assert_eq!(d.location, "cloud");
    assert!(!d.degraded);
    assert!(d.latency.unwrap_or(Duration::MAX) < Duration::from_millis(300));
}

#[tokio::test]
async fn test_balanced_only_healthy_candidate_wins() {
    let edge = healthy().await;
    let cloud = unhealthy().await;
    let c = coordinator(RouteStrategy::Balanced, &edge, &cloud, true);

    let d = c.route_request(&profile(), OperatingMode::Connected).await;
    assert_eq!(d.location, "edge");
    assert!(!d.degraded);
}

#[tokio::test]
async fn test_balanced_probes_both_locations_on_every_call() {
    let (edge, cloud) = (healthy().await, healthy().await);
    let c = coordinator(RouteStrategy::Balanced, &edge, &cloud, true);

    c.route_request(&profile(), OperatingMode::Connected).await;
    c.route_request(&profile(), OperatingMode::Connected).await;
    assert_eq!(health_hits(&edge).await, 2);
    assert_eq!(health_hits(&cloud).await, 2);
}

// ── off-grid ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_off_grid_forces_edge_even_when_unhealthy() {
    let (edge, cloud) = (unhealthy().await, healthy().await);
    let c = coordinator(RouteStrategy::CloudFirst, &edge, &cloud, true);

    let d = c.route_request(&profile(), OperatingMode::OffGrid).await;
    assert_eq!(d.location, "edge");
    assert_eq!(d.endpoint, edge.uri());
    assert_eq!(d.justification, OFF_GRID_FORCES_EDGE);
    assert_eq!(health_hits(&edge).await, 0);
    assert_eq!(health_hits(&cloud).await, 0);
}

// ── capability strategy ───────────────────────────────────────────

#[tokio::test]
async fn test_capability_strategy_tie_breaks_by_registration_order() {
    let (edge, cloud) = (healthy().await, healthy().await);
    let c = coordinator(RouteStrategy::CapabilityFirstAvailable, &edge, &cloud, true);
    for id in ["first", "second"] {
        c.register_backend(Backend::new(id, format!("http://{id}:9000"), ["llm"], 1));
        c.registry().set_online(id, true);
    }

    for _ in 0..10 {
        let d = c.route_request(&profile(), OperatingMode::Connected).await;
        assert_eq!(d.location, "first");
        assert_eq!(d.endpoint, "http://first:9000");
        assert!(!d.degraded);
    }
}

#[tokio::test]
async fn test_capability_select_reports_not_available() {
    let (edge, cloud) = (healthy().await, healthy().await);
    let c = coordinator(RouteStrategy::CapabilityFirstAvailable, &edge, &cloud, true);
    c.register_backend(Backend::new("busy", "http://busy", ["llm"], 1));
    c.registry().set_online("busy", true);
    c.registry().increment_load("busy");

    let err = c
        .router()
        .select(&profile(), RouteStrategy::CapabilityFirstAvailable)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RoutingError::NotAvailable {
            capability: "llm".into()
        }
    );

    let d = c.route_request(&profile(), OperatingMode::Connected).await;
    assert!(d.degraded);
    assert_eq!(d.justification, NO_HEALTHY_ENDPOINTS);
}

// ── stats ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_routing_stats_reflect_last_probes() {
    let (edge, cloud) = (healthy().await, unhealthy().await);
    let c = coordinator(RouteStrategy::Balanced, &edge, &cloud, true);

    let before = c.get_routing_stats();
    assert_eq!(before.strategy, RouteStrategy::Balanced);
    assert!(!before.endpoints["edge"].healthy);

    c.route_request(&profile(), OperatingMode::Connected).await;
    let after = c.get_routing_stats();
    assert!(after.endpoints["edge"].healthy);
    assert!(after.endpoints["edge"].latency_ms.is_some());
    assert!(!after.endpoints["cloud"].healthy);
    assert!(after.endpoints["cloud"].latency_ms.is_none());
    assert_eq!(after.endpoints["cloud"].endpoint, cloud.uri());
}
