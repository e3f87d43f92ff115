// Force simulation core
//
// One step applies, in order: center pull, pairwise inverse-square
// repulsion, edge springs, hard collision separation, then damped
// integration. Pinned nodes exert forces but never move.

use super::vec2::Vec2;
use crate::config::LayoutConfig;
use std::f32::consts::TAU;

const EPSILON: f32 = 0.0001;

/// Physics particle mirroring one topology node
#[derive(Clone, Debug, PartialEq)]
pub struct SimNode {
    pub id: String,
    pub position: Vec2,
    pub velocity: Vec2,
    pub radius: f32,
    pub pinned: bool,
}

impl SimNode {
    pub fn new(id: impl Into<String>, position: Vec2, radius: f32) -> Self {
        Self {
            id: id.into(),
            position,
            velocity: Vec2::ZERO,
            radius,
            pinned: false,
        }
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }
}

/// Spring between two node indices
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimEdge {
    pub source: usize,
    pub target: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ForceParams {
    pub center_strength: f32,
    pub repulsion: f32,
    pub spring_strength: f32,
    pub rest_length: f32,
    pub damping: f32,
    pub min_distance: f32,
    pub rest_velocity: f32,
    pub max_speed: f32,
}

impl Default for ForceParams {
    fn default() -> Self {
        Self::from(&LayoutConfig::default())
    }
}

impl From<&LayoutConfig> for ForceParams {
    fn from(config: &LayoutConfig) -> Self {
        Self {
            center_strength: config.center_strength,
            repulsion: config.repulsion,
            spring_strength: config.spring_strength,
            rest_length: config.rest_length,
            damping: config.damping.clamp(0.0, 1.0),
            min_distance: config.min_distance.max(EPSILON),
            rest_velocity: config.rest_velocity.max(0.0),
            max_speed: config.max_speed,
        }
    }
}

/// Unit vector from `b` to `a`, with a deterministic golden-angle fallback
/// for coincident points
fn direction(delta: Vec2, distance: f32, i: usize, j: usize) -> Vec2 {
    if distance > EPSILON {
        delta / distance
    } else {
        Vec2::from_angle(((i as f32) * 0.618_034 + (j as f32) * 0.414_214) * TAU)
    }
}

/// Advance the simulation by `iterations` steps.
pub fn simulate(
    nodes: &mut [SimNode],
    edges: &[SimEdge],
    center: Vec2,
    iterations: usize,
    params: &ForceParams,
) {
    if nodes.is_empty() {
        return;
    }
    let mut forces = vec![Vec2::ZERO; nodes.len()];
    for _ in 0..iterations {
        forces.iter_mut().for_each(|force| *force = Vec2::ZERO);
        step(nodes, edges, center, params, &mut forces);
    }
}

fn step(nodes: &mut [SimNode], edges: &[SimEdge], center: Vec2, params: &ForceParams, forces: &mut [Vec2]) {
    let count = nodes.len();

    for (node, force) in nodes.iter().zip(forces.iter_mut()) {
        *force += (center - node.position) * params.center_strength;
    }

    for i in 0..count {
        for j in (i + 1)..count {
            let delta = nodes[i].position - nodes[j].position;
            let raw = delta.length();
            let dir = direction(delta, raw, i, j);
            let distance = raw.max(params.min_distance);
            let push = dir * (params.repulsion / (distance * distance));
            forces[i] += push;
            forces[j] -= push;
        }
    }

    for edge in edges {
        let (s, t) = (edge.source, edge.target);
        if s >= count || t >= count || s == t {
            continue;
        }
        let delta = nodes[t].position - nodes[s].position;
        let raw = delta.length();
        let dir = direction(delta, raw, t, s);
        let stretch = raw.max(params.min_distance) - params.rest_length;
        let pull = dir * (stretch * params.spring_strength);
        forces[s] += pull;
        forces[t] -= pull;
    }

    resolve_collisions(nodes);

    for (node, force) in nodes.iter_mut().zip(forces.iter()) {
        if node.pinned {
            node.velocity = Vec2::ZERO;
            continue;
        }
        let mut velocity = (node.velocity + *force) * params.damping;
        let speed = velocity.length();
        if !velocity.is_finite() || speed < params.rest_velocity {
            velocity = Vec2::ZERO;
        } else if speed > params.max_speed {
            velocity = velocity / speed * params.max_speed;
        }
        node.velocity = velocity;
        node.position += velocity;
    }
}

/// Directly separate overlapping pairs. The correction is split evenly, or
/// applied wholly to the free node when the other is pinned.
fn resolve_collisions(nodes: &mut [SimNode]) {
    let count = nodes.len();
    for i in 0..count {
        for j in (i + 1)..count {
            if nodes[i].pinned && nodes[j].pinned {
                continue;
            }
            let min_gap = nodes[i].radius + nodes[j].radius;
            let delta = nodes[i].position - nodes[j].position;
            let raw = delta.length();
            if raw >= min_gap {
                continue;
            }
            let dir = direction(delta, raw, i, j);
            let correction = dir * (min_gap - raw);
            if nodes[i].pinned {
                nodes[j].position -= correction;
            } else if nodes[j].pinned {
                nodes[i].position += correction;
            } else {
                nodes[i].position += correction * 0.5;
                nodes[j].position -= correction * 0.5;
            }
        }
    }
}
