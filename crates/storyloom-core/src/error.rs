use thiserror::Error;

use crate::model::{NodeId, NodeStatus, PersonaId};

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Adding edge {from} -> {to} would create a cycle")]
    Cycle { from: NodeId, to: NodeId },

    #[error("Scheduler found a cycle: {} node(s) with unresolved dependencies", .unresolved.len())]
    ScheduleCycle { unresolved: Vec<NodeId> },

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Node {0} has no path from the root")]
    Orphan(NodeId),

    #[error("Persona not found: {id} (version {version:?})")]
    PersonaNotFound { id: PersonaId, version: Option<u32> },

    #[error("Persona already committed: {0} (use amend to create a new version)")]
    PersonaExists(PersonaId),

    #[error("Invalid status transition for node {id}: {from} -> {to}")]
    InvalidTransition {
        id: NodeId,
        from: NodeStatus,
        to: NodeStatus,
    },

    #[error("Node {0} is frozen (already audited)")]
    Frozen(NodeId),

    #[error("Invalid proposal from {node}: {reason}")]
    InvalidProposal { node: NodeId, reason: String },

    #[error("Invalid ID: {0}")]
    InvalidId(String),

    #[error("Project not found at {0}")]
    ProjectNotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid project file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// True for both insertion-time and schedule-time cycle failures.
    pub fn is_cycle(&self) -> bool {
        matches!(self, CoreError::Cycle { .. } | CoreError::ScheduleCycle { .. })
    }
}
