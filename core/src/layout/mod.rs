//! Force-directed placement of a topology snapshot.

pub mod engine;
pub mod simulation;
pub mod tick;
pub mod vec2;

pub use engine::{EnginePhase, LayoutEngine, LayoutFrame, NodePosition};
pub use simulation::{simulate, ForceParams, SimEdge, SimNode};
pub use tick::{IntervalTicks, ManualTickHandle, ManualTicks, TickSource};
pub use vec2::Vec2;
