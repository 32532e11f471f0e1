use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RunConfig;
use crate::error::CoreError;
use crate::graph::{BranchGraph, NodeStub};
use crate::model::{AssetCatalog, NodeId, NodeStatus, RejectionKind};
use crate::persona_store::PersonaStore;

pub const PROJECT_FORMAT_VERSION: u32 = 1;

/// World-level facts shared by every scene.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorldInfo {
    pub title: String,
    pub premise: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<String>,
}

/// Everything one story needs: personas, the branch graph, generated assets
/// and the run configuration. Passed explicitly through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    #[serde(default = "format_version")]
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub world: WorldInfo,
    #[serde(default)]
    pub config: RunConfig,
    #[serde(default)]
    pub personas: PersonaStore,
    #[serde(default)]
    pub graph: BranchGraph,
    #[serde(default)]
    pub assets: AssetCatalog,
}

fn format_version() -> u32 {
    PROJECT_FORMAT_VERSION
}

/// Node counts by status.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Progress {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub audited: usize,
    pub failed: usize,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.audited == self.total
    }
}

impl Project {
    pub fn new(world: WorldInfo, config: RunConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().as_simple().to_string(),
            format_version: PROJECT_FORMAT_VERSION,
            created_at: now,
            updated_at: now,
            world,
            config,
            personas: PersonaStore::new(),
            graph: BranchGraph::new(),
            assets: AssetCatalog::default(),
        }
    }

    /// Start a new story with the same cast: a fresh ID, an empty graph and
    /// asset catalog. World, config and personas carry over.
    pub fn reset(&mut self) {
        tracing::info!("Resetting project {}", self.id);
        let mut fresh = Project::new(self.world.clone(), self.config.clone());
        fresh.personas = std::mem::take(&mut self.personas);
        *self = fresh;
    }

    /// Create the opening scene if the graph is empty. Returns the root ID.
    pub fn ensure_root(&mut self) -> Result<NodeId, CoreError> {
        if let Some(root) = self.graph.root() {
            return Ok(root.clone());
        }
        let premise = format!("Opening scene. {}", self.world.premise);
        self.graph.add_node(NodeStub::new("root", premise), None)
    }

    /// Return nodes left mid-flight by an interrupted run to the queue.
    /// Returns how many were recovered.
    pub fn recover_interrupted(&mut self) -> Result<usize, CoreError> {
        let stuck: Vec<NodeId> = self
            .graph
            .nodes()
            .filter(|n| matches!(n.status, NodeStatus::InProgress | NodeStatus::Generated))
            .map(|n| n.id.clone())
            .collect();
        let max_retries = self.config.max_retries;
        for id in &stuck {
            let node = self.graph.require_mut(id)?;
            node.reject(RejectionKind::ContentIntegrity, "run interrupted before audit")?;
            node.requeue(max_retries)?;
            tracing::warn!("Recovered interrupted node {id}");
        }
        Ok(stuck.len())
    }

    pub fn progress(&self) -> Progress {
        let mut progress = Progress::default();
        for node in self.graph.nodes() {
            progress.total += 1;
            *progress.by_status.entry(node.status.to_string()).or_default() += 1;
            match node.status {
                NodeStatus::Audited => progress.audited += 1,
                NodeStatus::Failed => progress.failed += 1,
                _ => {}
            }
        }
        progress
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SceneContent;

    fn project() -> Project {
        Project::new(
            WorldInfo {
                title: "Spring Transfer".into(),
                premise: "A transfer student arrives in April.".into(),
                locations: vec!["classroom".into()],
            },
            RunConfig::default_init(),
        )
    }

    #[test]
    fn test_ensure_root_is_idempotent() {
        let mut p = project();
        let a = p.ensure_root().unwrap();
        let b = p.ensure_root().unwrap();
        assert_eq!(a, b);
        assert_eq!(p.graph.len(), 1);
        assert!(p.graph.node(&a).unwrap().premise.contains("transfer student"));
    }

    #[test]
    fn test_recover_interrupted() {
        let mut p = project();
        let root = p.ensure_root().unwrap();
        p.graph.node_mut(&root).unwrap().begin_attempt().unwrap();
        assert_eq!(p.recover_interrupted().unwrap(), 1);
        let node = p.graph.node(&root).unwrap();
        assert_eq!(node.status, NodeStatus::Pending);
        assert_eq!(node.rejections.len(), 1);
    }

    #[test]
    fn test_progress_counts() {
        let mut p = project();
        let root = p.ensure_root().unwrap();
        assert!(!p.progress().is_complete());
        let node = p.graph.node_mut(&root).unwrap();
        node.begin_attempt().unwrap();
        node.store_draft(SceneContent::default()).unwrap();
        node.freeze().unwrap();
        let progress = p.progress();
        assert!(progress.is_complete());
        assert_eq!(progress.by_status.get("audited"), Some(&1));
    }

    #[test]
    fn test_reset_clears_graph() {
        let mut p = project();
        let old_id = p.id.clone();
        p.ensure_root().unwrap();
        let personas = p.personas.len();
        p.reset();
        assert!(p.graph.is_empty());
        assert!(p.assets.is_empty());
        assert_eq!(p.personas.len(), personas);
        assert_ne!(p.id, old_id);
        assert_eq!(p.world.title, "Spring Transfer");
    }
}
