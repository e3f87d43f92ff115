// Topology Projection Tests
// End-to-end traffic scenario, idempotence, filtering and grouping modes.

use flowscope_core::config::BufferConfig;
use flowscope_core::event::{Event, EventKind, SharedEvent};
use flowscope_core::ingest::Batch;
use flowscope_core::telemetry::PipelineMetrics;
use flowscope_core::topology::{
    project, EdgeStatus, FilterState, GroupingMode, LayoutMode, NodeKind, ProjectionOptions,
    TimeRange, HUB_ID,
};
use flowscope_core::EventBuffer;
use std::collections::BTreeSet;
use std::sync::Arc;

const ENDPOINTS: [&str; 3] = ["/api/users", "/api/orders", "/health"];

/// 120 events, 40 per endpoint; the first five on `/api/orders` fail
fn scenario() -> Vec<SharedEvent> {
    let mut errors_left = 5;
    (0..120)
        .map(|i| {
            let endpoint = ENDPOINTS[i % 3];
            let status = if endpoint == "/api/orders" && errors_left > 0 {
                errors_left -= 1;
                503
            } else {
                200
            };
            Arc::new(
                Event::new(format!("evt-{}", i), EventKind::Request, 1_000 + i as i64, endpoint)
                    .with_route("web", "gateway")
                    .with_method("GET")
                    .with_status(status)
                    .with_duration(10.0 + (i % 7) as f64)
                    .with_category(if endpoint == "/health" { "ops" } else { "api" }),
            )
        })
        .collect()
}

#[test]
fn test_scenario_buffer_holds_everything_and_projects_four_nodes() {
    let config = BufferConfig {
        capacity: 100,
        eviction_multiplier: 2,
        archive_retention: 20,
        archive_path: None,
    };
    let mut buffer = EventBuffer::new(&config, PipelineMetrics::shared());
    let evicted = buffer.append(Batch::new(scenario()));
    assert_eq!(evicted, 0);
    assert_eq!(buffer.len(), 120);

    let snapshot = project(&buffer.get_all(), &FilterState::default(), &ProjectionOptions::default());
    assert_eq!(snapshot.nodes.len(), 4);
    assert_eq!(snapshot.edges.len(), 3);
    assert_eq!(snapshot.event_count, 120);

    let hub = snapshot.node(HUB_ID).unwrap();
    assert_eq!(hub.kind, NodeKind::Hub);
    assert_eq!(hub.request_count, 120);

    let orders = snapshot.node("/api/orders").unwrap();
    assert_eq!(orders.request_count, 40);
    assert_eq!(orders.error_count, 5);
    assert!((orders.error_rate - 0.125).abs() < f64::EPSILON);

    for endpoint in ["/api/users", "/health"] {
        let node = snapshot.node(endpoint).unwrap();
        assert_eq!(node.request_count, 40);
        assert_eq!(node.error_count, 0);
        assert_eq!(snapshot.edge(HUB_ID, endpoint).unwrap().status, EdgeStatus::Healthy);
    }

    let edge = snapshot.edge(HUB_ID, "/api/orders").unwrap();
    assert_eq!(edge.status, EdgeStatus::Degraded);
    assert_eq!(edge.recent.len(), 10);
    assert_eq!(edge.recent.last().unwrap().id, "evt-118");
}

#[test]
fn test_projection_is_idempotent() {
    let events = scenario();
    let filters = FilterState {
        search: Some("API".to_string()),
        ..Default::default()
    };
    for layout in [LayoutMode::Flat, LayoutMode::Hierarchical] {
        for grouping in [GroupingMode::Endpoint, GroupingMode::Router] {
            let options = ProjectionOptions {
                layout,
                grouping,
                ..Default::default()
            };
            let first = project(&events, &filters, &options);
            let second = project(&events, &filters, &options);
            assert_eq!(first, second);
            assert!(first.same_shape(&second));
        }
    }
}

#[test]
fn test_filters_never_touch_the_buffer() {
    let mut buffer = EventBuffer::new(&BufferConfig::default(), PipelineMetrics::shared());
    buffer.append(Batch::new(scenario()));
    let before = buffer.get_all();

    let filters = FilterState {
        status_codes: BTreeSet::from([503]),
        ..Default::default()
    };
    let snapshot = project(&buffer.get_all(), &filters, &ProjectionOptions::default());
    assert_eq!(snapshot.event_count, 5);
    assert_eq!(snapshot.nodes.len(), 2);
    assert_eq!(snapshot.edge(HUB_ID, "/api/orders").unwrap().status, EdgeStatus::Failing);

    assert_eq!(buffer.len(), 120);
    assert!(Arc::ptr_eq(&before, &buffer.get_all()));
}

#[test]
fn test_time_range_and_category_filters() {
    let events = scenario();
    let filters = FilterState {
        time_range: Some(TimeRange {
            start: Some(1_000),
            end: Some(1_029),
        }),
        category: Some("OPS".to_string()),
        ..Default::default()
    };
    let snapshot = project(&events, &filters, &ProjectionOptions::default());
    assert_eq!(snapshot.event_count, 10);
    assert_eq!(snapshot.node("/health").unwrap().request_count, 10);
    assert!(snapshot.node("/api/users").is_none());
}

#[test]
fn test_contradictory_filter_yields_bare_hub() {
    let filters = FilterState {
        time_range: Some(TimeRange {
            start: Some(5_000),
            end: Some(10),
        }),
        ..Default::default()
    };
    let snapshot = project(&scenario(), &filters, &ProjectionOptions::default());
    assert_eq!(snapshot.nodes.len(), 1);
    assert_eq!(snapshot.nodes[0].id, HUB_ID);
    assert!(snapshot.edges.is_empty());
}

#[test]
fn test_hierarchical_router_grouping() {
    let options = ProjectionOptions {
        layout: LayoutMode::Hierarchical,
        grouping: GroupingMode::Router,
        ..Default::default()
    };
    let snapshot = project(&scenario(), &FilterState::default(), &options);

    // hub, two categories, two router leaves
    assert_eq!(snapshot.nodes.len(), 5);
    let api = snapshot.node("api:/api").unwrap();
    assert_eq!(api.request_count, 80);
    assert_eq!(api.error_count, 5);
    assert_eq!(snapshot.node("@category/api").unwrap().kind, NodeKind::Category);
    assert!(snapshot.edge("@category/ops", "ops:/health").is_some());
    assert_eq!(snapshot.edge(HUB_ID, "@category/api").unwrap().request_count, 80);
}

#[test]
fn test_latency_percentiles() {
    let snapshot = project(&scenario(), &FilterState::default(), &ProjectionOptions::default());
    let latency = snapshot.node("/health").unwrap().latency.unwrap();
    assert!(latency.p50_ms <= latency.p95_ms);
    assert!(latency.p95_ms <= latency.p99_ms);
    assert!(latency.avg_ms >= 10.0 && latency.avg_ms <= 16.0);
}
