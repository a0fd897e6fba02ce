use std::collections::{HashMap, HashSet};

use tracing::debug;

use nodeflow_core::node::NodeRecord;

/// Directed graph over node ids, built fresh for every run.
///
/// Nodes keep their input position; successor lists keep edge
/// insertion order. Node ids are assumed unique.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    successors: Vec<Vec<usize>>,
    in_degree: Vec<usize>,
}

impl DependencyGraph {
    /// Build the graph from the edge descriptors embedded in node configs.
    ///
    /// Edges whose endpoints don't resolve, and repeated edges, are
    /// dropped without error.
    pub fn build(nodes: &[NodeRecord]) -> Self {
        let mut graph = Self::default();
        for node in nodes {
            graph.add_node(&node.id);
        }

        // Later declarations of the same edge-local id win.
        let local_ids: HashMap<&str, &str> = nodes
            .iter()
            .filter_map(|n| n.config_node_id().map(|local| (local, n.id.as_str())))
            .collect();

        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        for node in nodes {
            for edge in node.edge_descriptors() {
                let (Some(source), Some(target)) = (
                    local_ids.get(edge.source.as_str()),
                    local_ids.get(edge.target.as_str()),
                ) else {
                    debug!(
                        node_id = %node.id,
                        source = %edge.source,
                        target = %edge.target,
                        "Dropping edge with unresolved endpoint"
                    );
                    continue;
                };
                let (s, t) = (graph.index[*source], graph.index[*target]);
                if seen.insert((s, t)) {
                    graph.successors[s].push(t);
                    graph.in_degree[t] += 1;
                }
            }
        }
        graph
    }

    fn add_node(&mut self, id: &str) {
        if self.index.contains_key(id) {
            return;
        }
        self.index.insert(id.to_string(), self.ids.len());
        self.ids.push(id.to_string());
        self.successors.push(Vec::new());
        self.in_degree.push(0);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Node ids in input order.
    pub fn node_ids(&self) -> &[String] {
        &self.ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Dependents of `id`, in the order their edges were declared.
    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| self.successors[i].iter().map(|&j| self.ids[j].as_str()).collect())
            .unwrap_or_default()
    }

    pub fn in_degree(&self, id: &str) -> usize {
        self.index.get(id).map(|&i| self.in_degree[i]).unwrap_or(0)
    }

    /// Every edge as `(source, target)`.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.successors
            .iter()
            .enumerate()
            .flat_map(|(s, targets)| {
                targets
                    .iter()
                    .map(move |&t| (self.ids[s].as_str(), self.ids[t].as_str()))
            })
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.successors.iter().map(Vec::len).sum()
    }

    // Index-level access for the scheduler.

    pub(crate) fn successor_indices(&self, i: usize) -> &[usize] {
        &self.successors[i]
    }

    pub(crate) fn in_degrees(&self) -> &[usize] {
        &self.in_degree
    }
}
