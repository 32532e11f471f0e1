use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::proposal::{ChoiceTarget, NodeStub, ParentEdge, TopologyProposal};
use crate::error::CoreError;
use crate::model::{slugify, Edge, EdgeId, Node, NodeId, Precondition};
use crate::scheduler;

/// Where two scenes on different branches part ways.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Divergence {
    /// Lowest shared ancestors: shared ancestors none of whose children are shared.
    pub forks: Vec<NodeId>,
    /// Edges leaving a fork toward the first scene.
    pub toward_first: Vec<EdgeId>,
    /// Edges leaving a fork toward the second scene.
    pub toward_second: Vec<EdgeId>,
    /// Any of those edges carries a precondition, so a player may never see
    /// both branches.
    pub gated: bool,
}

/// The narrative DAG: scenes connected by player choices.
///
/// Nodes keep their insertion order, which the scheduler uses to break ties.
/// Every structural mutation goes through [`add_node`](Self::add_node),
/// [`add_edge`](Self::add_edge) or [`apply`](Self::apply); each of them either
/// commits fully or leaves the graph unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GraphFile", into = "GraphFile")]
pub struct BranchGraph {
    root: Option<NodeId>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    index: HashMap<NodeId, usize>,
    out_edges: Vec<Vec<usize>>,
    in_edges: Vec<Vec<usize>>,
}

/// On-disk shape of the graph; lookup tables are rebuilt on load.
#[derive(Serialize, Deserialize)]
struct GraphFile {
    #[serde(default)]
    root: Option<NodeId>,
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

impl From<BranchGraph> for GraphFile {
    fn from(g: BranchGraph) -> Self {
        GraphFile {
            root: g.root,
            nodes: g.nodes,
            edges: g.edges,
        }
    }
}

impl TryFrom<GraphFile> for BranchGraph {
    type Error = CoreError;

    fn try_from(file: GraphFile) -> Result<Self, Self::Error> {
        let mut graph = BranchGraph {
            root: file.root,
            ..Default::default()
        };
        for node in file.nodes {
            if graph.index.contains_key(&node.id) {
                return Err(CoreError::InvalidId(format!("duplicate node ID {}", node.id)));
            }
            graph.index.insert(node.id.clone(), graph.nodes.len());
            graph.nodes.push(node);
            graph.out_edges.push(Vec::new());
            graph.in_edges.push(Vec::new());
        }
        for edge in file.edges {
            let s = graph.position(&edge.source)?;
            let t = graph.position(&edge.target)?;
            let e = graph.edges.len();
            graph.out_edges[s].push(e);
            graph.in_edges[t].push(e);
            graph.edges.push(edge);
        }
        graph.validate()?;
        Ok(graph)
    }
}

impl BranchGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node. Without a parent edge the node becomes the root, which is
    /// only allowed once; every other node must be attached to an existing one.
    pub fn add_node(
        &mut self,
        stub: NodeStub,
        parent: Option<ParentEdge>,
    ) -> Result<NodeId, CoreError> {
        let id = self.allocate_id(stub.key.as_deref());
        match parent {
            None => {
                if self.root.is_some() {
                    return Err(CoreError::Orphan(id));
                }
                self.push_node(Node::new(id.clone(), stub.premise));
                self.root = Some(id.clone());
                tracing::debug!("Added root node {id}");
                Ok(id)
            }
            Some(parent) => {
                self.position(&parent.source)?;
                Self::check_label(&parent.source, &parent.label)?;
                self.check_precondition(&parent.source, parent.precondition.as_ref())?;
                self.check_label_unique(&parent.source, &parent.label)?;
                self.push_node(Node::new(id.clone(), stub.premise));
                // A fresh node has no outgoing edges, so this cannot close a cycle.
                if let Err(e) =
                    self.add_edge(&parent.source, &id, &parent.label, parent.precondition)
                {
                    self.pop_node();
                    return Err(e);
                }
                tracing::debug!("Added node {id} under {}", parent.source);
                Ok(id)
            }
        }
    }

    /// Insert a choice edge. Fails with [`CoreError::Cycle`] if `source` is
    /// reachable from `target`; a rejected call leaves the graph unchanged.
    pub fn add_edge(
        &mut self,
        source: &NodeId,
        target: &NodeId,
        label: &str,
        precondition: Option<Precondition>,
    ) -> Result<EdgeId, CoreError> {
        let s = self.position(source)?;
        let t = self.position(target)?;
        Self::check_label(source, label)?;
        if s == t || self.reachable(t, s) {
            tracing::warn!("Rejected edge {source} -> {target}: would create a cycle");
            return Err(CoreError::Cycle {
                from: source.clone(),
                to: target.clone(),
            });
        }
        self.check_precondition(source, precondition.as_ref())?;
        self.check_label_unique(source, label)?;

        let id = EdgeId::from_index(self.edges.len());
        let e = self.edges.len();
        self.edges.push(Edge {
            id: id.clone(),
            source: source.clone(),
            target: target.clone(),
            label: label.trim().to_string(),
            precondition,
        });
        self.out_edges[s].push(e);
        self.in_edges[t].push(e);
        Ok(id)
    }

    /// Attach a producer proposal to `source` atomically. Returns the target of
    /// every choice, in proposal order.
    pub fn apply(
        &mut self,
        source: &NodeId,
        proposal: &TopologyProposal,
    ) -> Result<Vec<NodeId>, CoreError> {
        let s = self.position(source)?;
        if !self.out_edges[s].is_empty() && !proposal.is_empty() {
            return Err(CoreError::InvalidProposal {
                node: source.clone(),
                reason: "scene already has outgoing choices".into(),
            });
        }

        let mut scratch = self.clone();
        let mut targets = Vec::with_capacity(proposal.choices.len());
        for choice in &proposal.choices {
            let target = match &choice.target {
                ChoiceTarget::New(stub) => scratch.add_node(
                    stub.clone(),
                    Some(ParentEdge {
                        source: source.clone(),
                        label: choice.label.clone(),
                        precondition: choice.precondition.clone(),
                    }),
                )?,
                ChoiceTarget::Existing(target) => {
                    scratch.add_edge(
                        source,
                        target,
                        &choice.label,
                        choice.precondition.clone(),
                    )?;
                    target.clone()
                }
            };
            targets.push(target);
        }
        *self = scratch;
        Ok(targets)
    }

    /// Nodes in generation order (see [`scheduler::order`]).
    pub fn nodes_in_dependency_order(&self) -> Result<Vec<NodeId>, CoreError> {
        scheduler::order(self)
    }

    /// Every ancestor of `id` in dependency order, ending with `id` itself.
    pub fn ancestors_of(&self, id: &NodeId) -> Result<Vec<NodeId>, CoreError> {
        let seen = self.ancestor_set(self.position(id)?);
        Ok(scheduler::order(self)?
            .into_iter()
            .filter(|n| seen.contains(&self.index[n]))
            .collect())
    }

    /// Diagnostic invariant check.
    pub fn is_acyclic(&self) -> bool {
        scheduler::order(self).is_ok()
    }

    /// Check every structural invariant: acyclic, single root, no orphans.
    pub fn validate(&self) -> Result<(), CoreError> {
        scheduler::order(self)?;
        let Some(root) = &self.root else {
            return match self.nodes.first() {
                Some(n) => Err(CoreError::Orphan(n.id.clone())),
                None => Ok(()),
            };
        };
        let root_pos = self.position(root)?;
        if !self.in_edges[root_pos].is_empty() {
            return Err(CoreError::Orphan(root.clone()));
        }
        let reachable = self.reachable_set(root_pos);
        if let Some(orphan) = self.nodes.iter().enumerate().find(|(i, _)| !reachable.contains(i))
        {
            return Err(CoreError::Orphan(orphan.1.id.clone()));
        }
        Ok(())
    }

    pub fn root(&self) -> Option<&NodeId> {
        self.root.as_ref()
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Mutable access to a node's status and content. The ID must not change.
    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.index.get(id).map(|&i| &mut self.nodes[i])
    }

    pub fn require(&self, id: &NodeId) -> Result<&Node, CoreError> {
        self.node(id).ok_or_else(|| CoreError::NodeNotFound(id.clone()))
    }

    pub fn require_mut(&mut self, id: &NodeId) -> Result<&mut Node, CoreError> {
        let i = self.position(id)?;
        Ok(&mut self.nodes[i])
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn edge(&self, id: &EdgeId) -> Option<&Edge> {
        self.edges.iter().find(|e| &e.id == id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Position of a node in insertion order.
    pub fn insertion_index(&self, id: &NodeId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn outgoing(&self, id: &NodeId) -> Vec<&Edge> {
        self.index
            .get(id)
            .map(|&i| self.out_edges[i].iter().map(|&e| &self.edges[e]).collect())
            .unwrap_or_default()
    }

    pub fn incoming(&self, id: &NodeId) -> Vec<&Edge> {
        self.index
            .get(id)
            .map(|&i| self.in_edges[i].iter().map(|&e| &self.edges[e]).collect())
            .unwrap_or_default()
    }

    /// Distinct parents in edge insertion order.
    pub fn parents(&self, id: &NodeId) -> Vec<&NodeId> {
        let mut seen = HashSet::new();
        self.incoming(id)
            .into_iter()
            .map(|e| &e.source)
            .filter(|p| seen.insert(*p))
            .collect()
    }

    /// Distinct children in edge insertion order.
    pub fn children(&self, id: &NodeId) -> Vec<&NodeId> {
        let mut seen = HashSet::new();
        self.outgoing(id)
            .into_iter()
            .map(|e| &e.target)
            .filter(|c| seen.insert(*c))
            .collect()
    }

    /// Nodes without outgoing choices (story endings).
    pub fn terminals(&self) -> Vec<&NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| self.out_edges[*i].is_empty())
            .map(|(_, n)| &n.id)
            .collect()
    }

    /// Nodes where branches converge (more than one parent).
    pub fn merge_points(&self) -> Vec<&NodeId> {
        self.nodes
            .iter()
            .filter(|n| self.parents(&n.id).len() > 1)
            .map(|n| &n.id)
            .collect()
    }

    /// Endings reachable from `from`, in insertion order.
    pub fn reachable_endings(&self, from: &NodeId) -> Result<Vec<NodeId>, CoreError> {
        let start = self.position(from)?;
        let reachable = self.reachable_set(start);
        Ok(self
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| reachable.contains(i) && self.out_edges[*i].is_empty())
            .map(|(_, n)| n.id.clone())
            .collect())
    }

    /// Every node reachable from the root, root included.
    pub fn reachable_from_root(&self) -> HashSet<NodeId> {
        match self.root.as_ref().and_then(|r| self.index.get(r)) {
            Some(&root) => self
                .reachable_set(root)
                .into_iter()
                .map(|i| self.nodes[i].id.clone())
                .collect(),
            None => HashSet::new(),
        }
    }

    /// Length of the longest choice path from the root to `id`.
    pub fn depth(&self, id: &NodeId) -> Result<usize, CoreError> {
        self.position(id)?;
        let order = scheduler::order(self)?;
        let mut depth: HashMap<&NodeId, usize> = HashMap::new();
        for n in &order {
            let d = self
                .parents(n)
                .into_iter()
                .filter_map(|p| depth.get(p))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(n, d);
            if n == id {
                return Ok(d);
            }
        }
        Err(CoreError::NodeNotFound(id.clone()))
    }

    /// Where the paths to `first` and `second` split. `None` when one is an
    /// ancestor of the other (or they are the same scene): both then lie on
    /// a single playthrough.
    pub fn divergence(
        &self,
        first: &NodeId,
        second: &NodeId,
    ) -> Result<Option<Divergence>, CoreError> {
        let a = self.position(first)?;
        let b = self.position(second)?;
        let up_a = self.ancestor_set(a);
        let up_b = self.ancestor_set(b);
        if up_a.contains(&b) || up_b.contains(&a) {
            return Ok(None);
        }

        // Shared ancestors are closed upward, so a fork is lowest exactly
        // when none of its children is shared.
        let shared: HashSet<usize> = up_a.intersection(&up_b).copied().collect();
        let mut divergence = Divergence::default();
        for (i, node) in self.nodes.iter().enumerate() {
            if !shared.contains(&i)
                || self.out_edges[i]
                    .iter()
                    .any(|&e| shared.contains(&self.index[&self.edges[e].target]))
            {
                continue;
            }
            divergence.forks.push(node.id.clone());
            for &e in &self.out_edges[i] {
                let edge = &self.edges[e];
                let t = self.index[&edge.target];
                let toward_first = up_a.contains(&t);
                if !toward_first && !up_b.contains(&t) {
                    continue;
                }
                divergence.gated |= edge.is_gated();
                if toward_first {
                    divergence.toward_first.push(edge.id.clone());
                } else {
                    divergence.toward_second.push(edge.id.clone());
                }
            }
        }
        Ok(Some(divergence))
    }

    fn position(&self, id: &NodeId) -> Result<usize, CoreError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| CoreError::NodeNotFound(id.clone()))
    }

    /// Breadth-first search bounded by the node count.
    fn reachable(&self, from: usize, to: usize) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([from]);
        visited[from] = true;
        while let Some(current) = queue.pop_front() {
            if current == to {
                return true;
            }
            for &e in &self.out_edges[current] {
                let next = self.index[&self.edges[e].target];
                if !visited[next] {
                    visited[next] = true;
                    queue.push_back(next);
                }
            }
        }
        false
    }

    /// `of` and every node it can be reached from.
    fn ancestor_set(&self, of: usize) -> HashSet<usize> {
        let mut seen = HashSet::from([of]);
        let mut queue = VecDeque::from([of]);
        while let Some(current) = queue.pop_front() {
            for &e in &self.in_edges[current] {
                let parent = self.index[&self.edges[e].source];
                if seen.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
        seen
    }

    fn reachable_set(&self, from: usize) -> HashSet<usize> {
        let mut seen = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            for &e in &self.out_edges[current] {
                let next = self.index[&self.edges[e].target];
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    fn allocate_id(&self, key: Option<&str>) -> NodeId {
        let base = match key.map(slugify) {
            Some(slug) if !slug.is_empty() => slug,
            _ if self.root.is_none() && self.nodes.is_empty() => "root".to_string(),
            _ => format!("scene-{}", self.nodes.len()),
        };
        let mut candidate = NodeId(base.clone());
        let mut n = 2;
        while self.index.contains_key(&candidate) {
            candidate = NodeId(format!("{base}-{n}"));
            n += 1;
        }
        candidate
    }

    fn push_node(&mut self, node: Node) {
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        self.out_edges.push(Vec::new());
        self.in_edges.push(Vec::new());
    }

    fn pop_node(&mut self) {
        if let Some(node) = self.nodes.pop() {
            self.index.remove(&node.id);
            self.out_edges.pop();
            self.in_edges.pop();
        }
    }

    fn check_label(source: &NodeId, label: &str) -> Result<(), CoreError> {
        if label.trim().is_empty() {
            return Err(CoreError::InvalidProposal {
                node: source.clone(),
                reason: "choice label is empty".into(),
            });
        }
        Ok(())
    }

    fn check_label_unique(&self, source: &NodeId, label: &str) -> Result<(), CoreError> {
        let label = label.trim();
        if self.outgoing(source).iter().any(|e| e.label == label) {
            return Err(CoreError::InvalidProposal {
                node: source.clone(),
                reason: format!("duplicate choice label {label:?}"),
            });
        }
        Ok(())
    }

    fn check_precondition(
        &self,
        source: &NodeId,
        precondition: Option<&Precondition>,
    ) -> Result<(), CoreError> {
        let Some(p) = precondition else {
            return Ok(());
        };
        if let Some(missing) = p
            .referenced_edges()
            .into_iter()
            .find(|e| self.edge(e).is_none())
        {
            return Err(CoreError::InvalidProposal {
                node: source.clone(),
                reason: format!("precondition references unknown choice {missing}"),
            });
        }
        Ok(())
    }
}
