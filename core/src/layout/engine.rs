// Layout engine state machine
//
// Uninitialized -> Converging { frame } -> Settled, and back to
// Uninitialized on reset. Converging frames run several simulation
// iterations each; settled frames run one.

use super::simulation::{simulate, ForceParams, SimEdge, SimNode};
use super::vec2::Vec2;
use crate::config::LayoutConfig;
use crate::topology::{NodeKind, TopologyNode, TopologySnapshot};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::f32::consts::{PI, TAU};
use std::hash::{Hash, Hasher};
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum EnginePhase {
    #[default]
    Uninitialized,
    Converging { frame: u32 },
    Settled,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodePosition {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub pinned: bool,
}

/// Render-ready positions after one tick
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LayoutFrame {
    pub frame: u64,
    pub phase: EnginePhase,
    pub nodes: Vec<NodePosition>,
    pub edges: Vec<(usize, usize)>,
    pub total_speed: f32,
}

/// Deterministic jitter in [-1, 1] per id
fn stable_pair(id: &str) -> (f32, f32) {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    let hash = hasher.finish();

    let x = ((hash & 0xffff_ffff) as f64 / u32::MAX as f64) as f32;
    let y = (((hash >> 32) & 0xffff_ffff) as f64 / u32::MAX as f64) as f32;
    ((x * 2.0) - 1.0, (y * 2.0) - 1.0)
}

pub struct LayoutEngine {
    params: ForceParams,
    settle_frames: u32,
    converging_iterations: usize,
    hub_radius: f32,
    node_radius: f32,
    center: Vec2,
    nodes: Vec<SimNode>,
    edges: Vec<SimEdge>,
    phase: EnginePhase,
    frame: u64,
}

impl LayoutEngine {
    pub fn new(config: &LayoutConfig) -> Self {
        Self {
            params: ForceParams::from(config),
            settle_frames: config.settle_frames,
            converging_iterations: config.converging_iterations.max(1),
            hub_radius: config.hub_radius,
            node_radius: config.node_radius,
            center: Vec2::ZERO,
            nodes: Vec::new(),
            edges: Vec::new(),
            phase: EnginePhase::Uninitialized,
            frame: 0,
        }
    }

    pub fn with_center(mut self, center: Vec2) -> Self {
        self.center = center;
        self
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[SimEdge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&SimNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Sum of per-node speeds; zero at rest
    pub fn total_speed(&self) -> f32 {
        self.nodes.iter().map(|node| node.velocity.length()).sum()
    }

    /// Drop all particles. The next `load` places nodes from scratch.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.phase = EnginePhase::Uninitialized;
    }

    fn radius_for(&self, node: &TopologyNode) -> f32 {
        match node.kind {
            NodeKind::Hub => self.hub_radius,
            NodeKind::Category => self.node_radius * 1.5,
            NodeKind::Endpoint => self.node_radius + (node.request_count as f32).ln_1p().min(6.0),
        }
    }

    fn same_graph(&self, snapshot: &TopologySnapshot, index: &HashMap<&str, usize>) -> bool {
        self.nodes.len() == snapshot.nodes.len()
            && self.nodes.iter().zip(&snapshot.nodes).all(|(a, b)| a.id == b.id)
            && self.edges.len() == snapshot.edges.len()
            && self.edges.iter().zip(&snapshot.edges).all(|(edge, topo)| {
                index.get(topo.source.as_str()) == Some(&edge.source)
                    && index.get(topo.target.as_str()) == Some(&edge.target)
            })
    }

    /// Mirror a topology snapshot into particles.
    ///
    /// An unchanged node/edge set only refreshes radii. Otherwise particles
    /// are rebuilt: known ids keep their position, new ones get a radial
    /// placement, and the engine re-enters convergence. Returns whether the
    /// particle set was rebuilt.
    pub fn load(&mut self, snapshot: &TopologySnapshot) -> bool {
        if snapshot.nodes.is_empty() {
            let had_nodes = !self.nodes.is_empty();
            self.reset();
            return had_nodes;
        }

        let index: HashMap<&str, usize> = snapshot
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.as_str(), i))
            .collect();

        if self.same_graph(snapshot, &index) {
            let radii: Vec<f32> = snapshot.nodes.iter().map(|topo| self.radius_for(topo)).collect();
            for (sim, radius) in self.nodes.iter_mut().zip(radii) {
                sim.radius = radius;
            }
            return false;
        }

        let edges: Vec<SimEdge> = snapshot
            .edges
            .iter()
            .filter_map(|edge| {
                Some(SimEdge {
                    source: *index.get(edge.source.as_str())?,
                    target: *index.get(edge.target.as_str())?,
                })
            })
            .collect();

        let previous: HashMap<&str, (Vec2, Vec2)> = self
            .nodes
            .iter()
            .map(|node| (node.id.as_str(), (node.position, node.velocity)))
            .collect();
        let placed = self.radial_placement(snapshot, &edges);

        let nodes: Vec<SimNode> = snapshot
            .nodes
            .iter()
            .zip(placed)
            .map(|(topo, initial)| {
                let pinned = topo.kind == NodeKind::Hub;
                let (position, velocity) = match previous.get(topo.id.as_str()) {
                    Some(&(position, velocity)) if !pinned => (position, velocity),
                    _ => (initial, Vec2::ZERO),
                };
                SimNode {
                    id: topo.id.clone(),
                    position,
                    velocity,
                    radius: self.radius_for(topo),
                    pinned,
                }
            })
            .collect();

        debug!(
            nodes = nodes.len(),
            edges = edges.len(),
            reused = previous.len(),
            "Layout particles rebuilt"
        );
        self.nodes = nodes;
        self.edges = edges;
        self.phase = EnginePhase::Converging { frame: 0 };
        true
    }

    /// Hub at the center, children fanned out around their parent at the
    /// spring rest length, with a small per-id jitter.
    fn radial_placement(&self, snapshot: &TopologySnapshot, edges: &[SimEdge]) -> Vec<Vec2> {
        let count = snapshot.nodes.len();
        let rest = self.params.rest_length;

        let mut parent: Vec<Option<usize>> = vec![None; count];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); count];
        for edge in edges {
            if parent[edge.target].is_none() && edge.source != edge.target {
                parent[edge.target] = Some(edge.source);
                children[edge.source].push(edge.target);
            }
        }

        let mut positions = vec![self.center; count];
        let mut angles = vec![0.0_f32; count];
        let mut placed = vec![false; count];

        let roots: Vec<usize> = (0..count).filter(|&i| parent[i].is_none()).collect();
        let mut queue = VecDeque::from(roots.clone());
        for (k, &root) in roots.iter().enumerate() {
            placed[root] = true;
            if snapshot.nodes[root].kind != NodeKind::Hub && roots.len() > 1 {
                let angle = k as f32 / roots.len() as f32 * TAU;
                positions[root] = self.center + Vec2::from_angle(angle) * rest;
                angles[root] = angle;
            }
        }

        while let Some(current) = queue.pop_front() {
            let siblings = children[current].len();
            for (k, &child) in children[current].iter().enumerate() {
                if placed[child] {
                    continue;
                }
                let (jx, jy) = stable_pair(&snapshot.nodes[child].id);
                let (base, spread) = if parent[current].is_none() {
                    (k as f32 / siblings as f32 * TAU, TAU / siblings as f32)
                } else {
                    (
                        angles[current] + ((k as f32 + 0.5) / siblings as f32 - 0.5) * PI,
                        PI / siblings as f32,
                    )
                };
                let angle = base + jx * 0.2 * spread;
                angles[child] = angle;
                positions[child] = positions[current] + Vec2::from_angle(angle) * (rest * (1.0 + jy * 0.05));
                placed[child] = true;
                queue.push_back(child);
            }
        }
        positions
    }

    /// Advance one animation frame. Returns the number of simulation
    /// iterations run.
    pub fn tick(&mut self) -> usize {
        let iterations = match self.phase {
            EnginePhase::Uninitialized => return 0,
            EnginePhase::Converging { frame } => {
                let next = frame + 1;
                self.phase = if next >= self.settle_frames {
                    debug!(frames = next, speed = self.total_speed(), "Layout settled");
                    EnginePhase::Settled
                } else {
                    EnginePhase::Converging { frame: next }
                };
                self.converging_iterations
            }
            EnginePhase::Settled => 1,
        };
        simulate(&mut self.nodes, &self.edges, self.center, iterations, &self.params);
        self.frame += 1;
        iterations
    }

    pub fn snapshot(&self) -> LayoutFrame {
        LayoutFrame {
            frame: self.frame,
            phase: self.phase,
            nodes: self
                .nodes
                .iter()
                .map(|node| NodePosition {
                    id: node.id.clone(),
                    x: node.position.x,
                    y: node.position.y,
                    radius: node.radius,
                    pinned: node.pinned,
                })
                .collect(),
            edges: self.edges.iter().map(|edge| (edge.source, edge.target)).collect(),
            total_speed: self.total_speed(),
        }
    }
}
