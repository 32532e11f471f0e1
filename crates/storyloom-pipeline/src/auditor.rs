//! Acceptance gate between a finished draft and the live project.
//!
//! Checks run in a fixed order and the first failure wins:
//! persona fidelity, cross-branch consistency, structural completeness.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use storyloom_core::graph::{ChoiceTarget, TopologyProposal};
use storyloom_core::model::{
    location_key, AssetCatalog, NodeId, NodeStatus, PersonaId, RejectionKind,
};
use storyloom_core::{BranchGraph, PersonaStore};

use crate::judge::PersonaJudge;
use crate::stages::Draft;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject { kind: RejectionKind, reason: String },
}

impl Verdict {
    fn consistency(reason: impl Into<String>) -> Self {
        Verdict::Reject {
            kind: RejectionKind::ConsistencyViolation,
            reason: reason.into(),
        }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

#[derive(Clone)]
pub struct Auditor {
    judge: Arc<dyn PersonaJudge>,
}

impl Auditor {
    pub fn new(judge: Arc<dyn PersonaJudge>) -> Self {
        Self { judge }
    }

    pub fn audit(
        &self,
        graph: &BranchGraph,
        store: &PersonaStore,
        catalog: &AssetCatalog,
        draft: &Draft,
    ) -> Verdict {
        let result = self
            .persona_fidelity(store, catalog, draft)
            .and_then(|()| cross_branch(graph, draft))
            .and_then(|()| structure(graph, &draft.node, &draft.proposal));
        match result {
            Ok(()) => {
                tracing::debug!("Audit accepted {}", draft.node);
                Verdict::Accept
            }
            Err(reason) => {
                tracing::warn!("Audit rejected {}: {reason}", draft.node);
                Verdict::consistency(reason)
            }
        }
    }

    fn persona_fidelity(
        &self,
        store: &PersonaStore,
        catalog: &AssetCatalog,
        draft: &Draft,
    ) -> Result<(), String> {
        if draft.content.summary.trim().is_empty() {
            return Err("scene has no summary".into());
        }
        let drawn: HashSet<String> = draft.new_assets.iter().map(|e| e.pose.key()).collect();
        for (i, line) in draft.content.dialogue.iter().enumerate() {
            let Some(speaker) = &line.speaker else {
                continue;
            };
            let persona = store
                .get(speaker)
                .ok_or_else(|| format!("line {} references unknown persona {speaker}", i + 1))?;
            let pose = line
                .pose
                .as_ref()
                .ok_or_else(|| format!("line {} by {speaker} has no pose", i + 1))?;
            if !pose.belongs_to(speaker) {
                return Err(format!("line {} by {speaker} uses {pose}", i + 1));
            }
            if !catalog.contains(pose) && !drawn.contains(&pose.key()) {
                return Err(format!("pose {pose} has no asset"));
            }
            self.judge
                .judge(persona, line)
                .map_err(|reason| format!("line {} out of character: {reason}", i + 1))?;
        }
        for change in &draft.content.state_changes {
            if !store.contains(&change.persona) {
                return Err(format!("state change for unknown persona {}", change.persona));
            }
        }
        for change in &draft.content.affection {
            if !store.contains(&change.persona) {
                return Err(format!("affection change for unknown persona {}", change.persona));
            }
        }
        if let Some(location) = draft.content.location.as_deref().map(str::trim) {
            let key = location_key(location);
            let drawn = draft
                .new_backgrounds
                .iter()
                .any(|b| location_key(&b.location) == key);
            if !location.is_empty() && !drawn && !catalog.contains_background(location) {
                return Err(format!("location {location:?} has no background"));
            }
        }
        Ok(())
    }
}

/// Persona state left behind by the scenes on `other`'s path that are not on
/// the draft's own path, in play order. Later scenes override earlier ones.
fn branch_state(
    graph: &BranchGraph,
    other: &NodeId,
    own_path: &HashSet<NodeId>,
) -> Result<BTreeMap<(PersonaId, String), (String, NodeId)>, String> {
    let mut state = BTreeMap::new();
    let path = graph.ancestors_of(other).map_err(|e| e.to_string())?;
    for id in path.iter().filter(|id| !own_path.contains(*id)) {
        let Some(node) = graph.node(id) else {
            continue;
        };
        if !matches!(node.status, NodeStatus::Generated | NodeStatus::Audited) {
            continue;
        }
        let Some(content) = &node.content else {
            continue;
        };
        for change in &content.state_changes {
            state.insert(
                (change.persona.clone(), change.attribute.clone()),
                (change.value.clone(), id.clone()),
            );
        }
    }
    Ok(state)
}

/// Scenes generated on another branch (neither ancestor nor descendant of
/// the draft) may not leave a persona attribute at a different value than the
/// draft sets, unless an edge where the two paths split is gated by a
/// precondition.
fn cross_branch(graph: &BranchGraph, draft: &Draft) -> Result<(), String> {
    if draft.content.state_changes.is_empty() {
        return Ok(());
    }
    let own_path: HashSet<NodeId> = graph
        .ancestors_of(&draft.node)
        .map_err(|e| e.to_string())?
        .into_iter()
        .collect();
    for other in graph.nodes() {
        if other.id == draft.node
            || !matches!(other.status, NodeStatus::Generated | NodeStatus::Audited)
        {
            continue;
        }
        let Some(divergence) = graph
            .divergence(&draft.node, &other.id)
            .map_err(|e| e.to_string())?
        else {
            continue;
        };
        if divergence.gated {
            continue;
        }
        let theirs = branch_state(graph, &other.id, &own_path)?;
        for mine in &draft.content.state_changes {
            let Some((value, set_by)) = theirs.get(&(mine.persona.clone(), mine.attribute.clone()))
            else {
                continue;
            };
            if value != &mine.value {
                return Err(format!(
                    "{}.{} is {:?} here but {:?} after {} on another branch",
                    mine.persona, mine.attribute, mine.value, value, set_by
                ));
            }
        }
    }
    Ok(())
}

fn structure(graph: &BranchGraph, node: &NodeId, proposal: &TopologyProposal) -> Result<(), String> {
    let mut labels = HashSet::new();
    for choice in &proposal.choices {
        let label = choice.label.trim();
        if label.is_empty() {
            return Err("choice with an empty label".into());
        }
        if !labels.insert(label) {
            return Err(format!("duplicate choice label {label:?}"));
        }
        if let ChoiceTarget::Existing(target) = &choice.target {
            let existing = graph
                .node(target)
                .ok_or_else(|| format!("choice {label:?} targets unknown scene {target}"))?;
            if existing.status != NodeStatus::Pending {
                return Err(format!(
                    "choice {label:?} links to {target}, which is already {}",
                    existing.status
                ));
            }
        }
    }
    let mut scratch = graph.clone();
    scratch
        .apply(node, proposal)
        .map_err(|e| format!("proposal does not fit the graph: {e}"))?;
    Ok(())
}
