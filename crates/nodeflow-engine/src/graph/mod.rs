//! Dependency graph and execution ordering.
//!
//! Edges live inside each node's config and reference edge-local ids
//! (`config.node.id`) rather than node ids. `DependencyGraph::build`
//! resolves them, and `schedule` turns the graph into a run order that
//! tolerates cycles.

pub mod builder;
pub mod scheduler;

pub use builder::DependencyGraph;
pub use scheduler::{find_cycle, has_cycle, schedule, Schedule};
