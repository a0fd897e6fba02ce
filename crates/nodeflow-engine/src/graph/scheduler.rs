use std::collections::VecDeque;

use serde::Serialize;
use tracing::warn;

use super::builder::DependencyGraph;

/// Execution order for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Schedule {
    /// Every node id exactly once. Topologically valid up to the first
    /// id of `cyclic`.
    pub order: Vec<String>,
    /// Ids Kahn's algorithm could not place because they sit on, or
    /// downstream of, a cycle. They also close out `order`, in input order.
    pub cyclic: Vec<String>,
}

impl Schedule {
    pub fn has_cycles(&self) -> bool {
        !self.cyclic.is_empty()
    }
}

/// Compute the execution order with Kahn's algorithm.
///
/// The queue is seeded with zero in-degree nodes in input order and ties
/// are broken first-in first-out, so the result is deterministic. Nodes left
/// over when the queue drains are appended in input order.
pub fn schedule(graph: &DependencyGraph) -> Schedule {
    let ids = graph.node_ids();
    let mut in_degree = graph.in_degrees().to_vec();
    let mut placed = vec![false; ids.len()];
    let mut order = Vec::with_capacity(ids.len());

    let mut queue: VecDeque<usize> = (0..ids.len()).filter(|&i| in_degree[i] == 0).collect();
    while let Some(i) = queue.pop_front() {
        if placed[i] {
            continue;
        }
        placed[i] = true;
        order.push(ids[i].clone());
        for &next in graph.successor_indices(i) {
            in_degree[next] = in_degree[next].saturating_sub(1);
            if in_degree[next] == 0 && !placed[next] {
                queue.push_back(next);
            }
        }
    }

    let cyclic: Vec<String> = (0..ids.len())
        .filter(|&i| !placed[i])
        .map(|i| ids[i].clone())
        .collect();
    if !cyclic.is_empty() {
        warn!(
            nodes = ?cyclic,
            example_cycle = ?find_cycle(graph),
            "Cycle detected; running remaining nodes in input order"
        );
        order.extend(cyclic.iter().cloned());
    }

    Schedule { order, cyclic }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Whether the graph contains at least one directed cycle.
pub fn has_cycle(graph: &DependencyGraph) -> bool {
    find_cycle(graph).is_some()
}

/// One directed cycle, as the ids along it starting and ending at the same
/// node, found by an iterative three-color depth-first search.
pub fn find_cycle(graph: &DependencyGraph) -> Option<Vec<String>> {
    let ids = graph.node_ids();
    let mut color = vec![Color::White; ids.len()];

    for root in 0..ids.len() {
        if color[root] != Color::White {
            continue;
        }
        // Each frame is (node, index of the next successor to visit).
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        color[root] = Color::Gray;

        while let Some(frame) = stack.last_mut() {
            let (node, cursor) = *frame;
            let successors = graph.successor_indices(node);
            if cursor == successors.len() {
                color[node] = Color::Black;
                stack.pop();
                continue;
            }
            frame.1 += 1;

            let next = successors[cursor];
            match color[next] {
                Color::White => {
                    color[next] = Color::Gray;
                    stack.push((next, 0));
                }
                Color::Gray => {
                    let start = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|&(n, _)| ids[n].clone()).collect();
                    cycle.push(ids[next].clone());
                    return Some(cycle);
                }
                Color::Black => {}
            }
        }
    }
    None
}
