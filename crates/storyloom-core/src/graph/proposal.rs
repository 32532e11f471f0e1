use serde::{Deserialize, Serialize};

use crate::model::{NodeId, Precondition};

/// A scene that does not exist yet, proposed as the target of a choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeStub {
    /// Preferred ID; slugified and de-duplicated by the graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub premise: String,
}

impl NodeStub {
    pub fn new(key: impl Into<String>, premise: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            premise: premise.into(),
        }
    }
}

/// The edge through which a new node is attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParentEdge {
    pub source: NodeId,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precondition: Option<Precondition>,
}

impl ParentEdge {
    pub fn new(source: NodeId, label: impl Into<String>) -> Self {
        Self {
            source,
            label: label.into(),
            precondition: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceTarget {
    New(NodeStub),
    Existing(NodeId),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposedChoice {
    pub label: String,
    pub target: ChoiceTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precondition: Option<Precondition>,
}

/// Outgoing choices the producer wants to attach to one scene. Applied
/// atomically through [`BranchGraph::apply`](super::BranchGraph::apply).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TopologyProposal {
    #[serde(default)]
    pub choices: Vec<ProposedChoice>,
}

impl TopologyProposal {
    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    pub fn new_stub_count(&self) -> usize {
        self.choices
            .iter()
            .filter(|c| matches!(c.target, ChoiceTarget::New(_)))
            .count()
    }
}
