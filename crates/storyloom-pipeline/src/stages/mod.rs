//! The four generation stages. Each one takes the draft produced so far and
//! returns it extended; none of them touches the live project.

pub mod actor;
pub mod artist;
pub mod producer;
pub mod writer;

use std::sync::Arc;

use async_trait::async_trait;
use storyloom_core::graph::TopologyProposal;
use storyloom_core::model::{BackgroundEntry, CatalogEntry, NodeId, SceneContent};
use storyloom_core::Project;

use crate::context::GenerationContext;
use crate::error::{ProviderError, StageError};
use crate::provider::Providers;

pub use actor::Actor;
pub use artist::Artist;
pub use producer::Producer;
pub use writer::Writer;

/// One attempt's output before the auditor has seen it.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub node: NodeId,
    pub attempt: u32,
    pub content: SceneContent,
    /// Outgoing choices, committed through `BranchGraph::apply` on acceptance.
    pub proposal: TopologyProposal,
    /// Poses generated during this attempt.
    pub new_assets: Vec<CatalogEntry>,
    pub new_backgrounds: Vec<BackgroundEntry>,
}

impl Draft {
    pub fn new(node: NodeId, attempt: u32) -> Self {
        Self {
            node,
            attempt,
            content: SceneContent::default(),
            proposal: TopologyProposal::default(),
            new_assets: Vec::new(),
            new_backgrounds: Vec::new(),
        }
    }
}

/// Read-only inputs shared by every stage of one node's attempt.
#[derive(Clone)]
pub struct StageContext {
    /// Project as it was when the node started.
    pub snapshot: Arc<Project>,
    pub generation: GenerationContext,
    pub providers: Providers,
    /// Most outgoing choices this node may propose.
    pub choice_budget: usize,
}

impl StageContext {
    /// World and cast description shared by the text prompts.
    pub fn world_brief(&self) -> String {
        let project = &self.snapshot;
        let mut out = format!(
            "Title: {}\nPremise: {}\nStyle: {}\nLanguage: {}\n",
            project.world.title, project.world.premise, project.config.style, project.config.language
        );
        if !project.world.locations.is_empty() {
            out.push_str(&format!("Locations: {}\n", project.world.locations.join(", ")));
        }
        out.push_str("Cast (use these IDs):\n");
        for persona in project.personas.iter_latest() {
            out.push_str(&format!("- {}\n", persona.describe()));
        }
        out
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, draft: Draft, ctx: &StageContext) -> Result<Draft, StageError>;
}

pub(crate) fn provider_failure(stage: &'static str) -> impl Fn(ProviderError) -> StageError {
    move |source| StageError::Provider { stage, source }
}
