use storyloom_core::model::NodeId;
use storyloom_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Graph is not complete: {} scene(s) not audited ({})", .nodes.len(), list(.nodes))]
    IncompleteGraph { nodes: Vec<NodeId> },

    #[error("Invalid game data: {0}")]
    Invalid(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

fn list(nodes: &[NodeId]) -> String {
    nodes
        .iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
