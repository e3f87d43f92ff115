// Layout Engine Tests
// Convergence from radial placement and pinned-anchor invariance, driven
// headlessly through the tick sources.

use flowscope_core::config::LayoutConfig;
use flowscope_core::event::{Event, EventKind, SharedEvent};
use flowscope_core::layout::{
    simulate, EnginePhase, ForceParams, LayoutEngine, ManualTicks, SimEdge, SimNode, TickSource, Vec2,
};
use flowscope_core::topology::{project, FilterState, ProjectionOptions, HUB_ID};
use std::sync::Arc;

fn fan_out(endpoints: usize) -> Vec<SharedEvent> {
    (0..endpoints)
        .map(|i| Arc::new(Event::new(format!("evt-{}", i), EventKind::Request, i as i64, format!("/svc/{}", i))))
        .collect()
}

#[test]
fn test_forty_nodes_reach_rest_within_converging_budget() {
    let config = LayoutConfig::default();
    let snapshot = project(&fan_out(40), &FilterState::default(), &ProjectionOptions::default());
    assert_eq!(snapshot.nodes.len(), 41);

    let mut engine = LayoutEngine::new(&config);
    assert!(engine.load(&snapshot));
    for _ in 0..config.settle_frames {
        assert_eq!(engine.tick(), config.converging_iterations);
    }

    assert_eq!(engine.phase(), EnginePhase::Settled);
    let speed = engine.total_speed();
    assert!(speed < 0.5, "layout still moving: total speed {}", speed);
    for node in engine.nodes() {
        assert!(node.position.is_finite(), "{} diverged", node.id);
    }
    assert_eq!(engine.node(HUB_ID).unwrap().position, Vec2::ZERO);

    // Settled frames cost one iteration
    assert_eq!(engine.tick(), 1);
}

#[test]
fn test_pinned_node_never_moves() {
    let anchor = Vec2::new(-37.5, 12.25);
    let params = ForceParams {
        repulsion: 1.0e7,
        spring_strength: 0.9,
        ..ForceParams::default()
    };

    let mut nodes = vec![SimNode::new("hub", anchor, 18.0).pinned()];
    let mut edges = Vec::new();
    for i in 0..12 {
        // Stack several neighbors right on top of the anchor
        let offset = Vec2::new((i % 3) as f32 * 0.5, 0.0);
        nodes.push(SimNode::new(format!("n{}", i), anchor + offset, 6.0));
        edges.push(SimEdge { source: 0, target: i + 1 });
    }

    for _ in 0..50 {
        simulate(&mut nodes, &edges, Vec2::new(500.0, 500.0), 10, &params);
        assert_eq!(nodes[0].position, anchor);
        assert_eq!(nodes[0].velocity, Vec2::ZERO);
    }
    for node in &nodes[1..] {
        assert!(node.position.is_finite());
        assert!((node.position - anchor).length() > 1.0);
    }
}

#[tokio::test]
async fn test_manual_ticks_drive_engine_headlessly() {
    let config = LayoutConfig {
        settle_frames: 4,
        ..LayoutConfig::default()
    };
    let mut engine = LayoutEngine::new(&config);
    engine.load(&project(&fan_out(6), &FilterState::default(), &ProjectionOptions::default()));

    let (mut ticks, handle) = ManualTicks::new();
    assert!(handle.tick_n(6));
    drop(handle);

    let mut frames = 0;
    while ticks.next_tick().await.is_some() {
        engine.tick();
        frames += 1;
    }
    assert_eq!(frames, 6);
    assert_eq!(engine.phase(), EnginePhase::Settled);
    assert_eq!(engine.snapshot().frame, 6);
}
