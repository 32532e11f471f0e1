//! Generation order over the branch graph.
//!
//! Kahn's algorithm with a min-heap on insertion index, so nodes that become
//! ready at the same time are emitted earliest-added first and the order is
//! reproducible for a given graph.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::CoreError;
use crate::graph::BranchGraph;
use crate::model::{NodeId, NodeStatus};

/// Every node such that for each edge `(u, v)`, `u` precedes `v`.
pub fn order(graph: &BranchGraph) -> Result<Vec<NodeId>, CoreError> {
    let nodes: Vec<&NodeId> = graph.nodes().map(|n| &n.id).collect();
    let mut in_degree: Vec<usize> = nodes.iter().map(|id| graph.incoming(id).len()).collect();

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut out = Vec::with_capacity(nodes.len());
    while let Some(Reverse(i)) = ready.pop() {
        out.push(nodes[i].clone());
        for edge in graph.outgoing(nodes[i]) {
            let Some(t) = graph.insertion_index(&edge.target) else {
                continue;
            };
            in_degree[t] -= 1;
            if in_degree[t] == 0 {
                ready.push(Reverse(t));
            }
        }
    }

    if out.len() != nodes.len() {
        let unresolved: Vec<NodeId> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d > 0)
            .map(|(i, _)| nodes[i].clone())
            .collect();
        tracing::error!("Scheduler left {} node(s) unresolved", unresolved.len());
        return Err(CoreError::ScheduleCycle { unresolved });
    }
    Ok(out)
}

/// Dependency levels: level `k` holds the nodes whose longest path from a
/// source node has length `k`. Nodes within a level are mutually independent.
pub fn levels(graph: &BranchGraph) -> Result<Vec<Vec<NodeId>>, CoreError> {
    let order = order(graph)?;
    let mut level_of: HashMap<&NodeId, usize> = HashMap::with_capacity(order.len());
    let mut levels: Vec<Vec<NodeId>> = Vec::new();
    for id in &order {
        let level = graph
            .parents(id)
            .into_iter()
            .filter_map(|p| level_of.get(p))
            .map(|l| l + 1)
            .max()
            .unwrap_or(0);
        level_of.insert(id, level);
        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        levels[level].push(id.clone());
    }
    Ok(levels)
}

/// Pending nodes whose parents are all audited, in scheduler order. This is
/// the next batch that may be generated concurrently.
pub fn ready(graph: &BranchGraph) -> Result<Vec<NodeId>, CoreError> {
    Ok(order(graph)?
        .into_iter()
        .filter(|id| {
            graph.node(id).map(|n| n.status) == Some(NodeStatus::Pending)
                && graph
                    .parents(id)
                    .into_iter()
                    .all(|p| graph.node(p).is_some_and(|n| n.is_audited()))
        })
        .collect())
}
