use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::asset::PoseRef;
use super::ids::{NodeId, PersonaId};
use super::persona::PersonaRef;
use crate::error::CoreError;

/// Per-node generation state machine:
/// Pending -> InProgress -> {Generated -> Audited | Rejected -> Pending | Failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    InProgress,
    Generated,
    Audited,
    Rejected,
    /// Retry ceiling exhausted; needs manual intervention.
    Failed,
}

impl NodeStatus {
    pub fn can_transition_to(self, to: NodeStatus) -> bool {
        use NodeStatus::*;
        matches!(
            (self, to),
            (Pending, InProgress)
                | (InProgress, Generated)
                | (InProgress, Rejected)
                | (Generated, Audited)
                | (Generated, Rejected)
                | (Rejected, Pending)
                | (Rejected, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Audited | NodeStatus::Failed)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::InProgress => "in_progress",
            NodeStatus::Generated => "generated",
            NodeStatus::Audited => "audited",
            NodeStatus::Rejected => "rejected",
            NodeStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One line of a scene. `speaker == None` is narration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DialogueLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<PersonaRef>,
    pub text: String,
    pub emotion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<PoseRef>,
}

impl DialogueLine {
    pub fn narration(text: impl Into<String>) -> Self {
        Self {
            speaker: None,
            text: text.into(),
            emotion: "neutral".into(),
            pose: None,
        }
    }
}

/// A visible change to a persona's state established by a scene
/// (e.g. `alice.outfit = "rain-soaked uniform"`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateChange {
    pub persona: PersonaId,
    pub attribute: String,
    pub value: String,
}

/// How much a scene moves a persona's affection for the player. Affection
/// depends on the path taken, so it is never compared across branches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AffectionChange {
    pub persona: PersonaId,
    pub delta: i32,
}

/// The accepted payload of a scene.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SceneContent {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub dialogue: Vec<DialogueLine>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state_changes: Vec<StateChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affection: Vec<AffectionChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    ContentIntegrity,
    ConsistencyViolation,
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionKind::ContentIntegrity => f.write_str("content-integrity"),
            RejectionKind::ConsistencyViolation => f.write_str("consistency-violation"),
        }
    }
}

/// Why an attempt was discarded. Fed back into the next attempt's context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rejection {
    pub attempt: u32,
    pub kind: RejectionKind,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// A scene in the branch graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// What the producer intended this scene to be when it was proposed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub premise: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<SceneContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejections: Vec<Rejection>,
}

impl Node {
    pub fn new(id: NodeId, premise: impl Into<String>) -> Self {
        Self {
            id,
            premise: premise.into(),
            status: NodeStatus::Pending,
            attempts: 0,
            content: None,
            rejections: Vec::new(),
        }
    }

    pub fn transition(&mut self, to: NodeStatus) -> Result<(), CoreError> {
        if self.status == NodeStatus::Audited {
            return Err(CoreError::Frozen(self.id.clone()));
        }
        if !self.status.can_transition_to(to) {
            return Err(CoreError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Pending -> InProgress, counting the attempt.
    pub fn begin_attempt(&mut self) -> Result<u32, CoreError> {
        self.transition(NodeStatus::InProgress)?;
        self.attempts += 1;
        Ok(self.attempts)
    }

    /// InProgress -> Generated with the attempt's content.
    pub fn store_draft(&mut self, content: SceneContent) -> Result<(), CoreError> {
        self.transition(NodeStatus::Generated)?;
        self.content = Some(content);
        Ok(())
    }

    /// Generated -> Audited. Content is frozen from here on.
    pub fn freeze(&mut self) -> Result<(), CoreError> {
        self.transition(NodeStatus::Audited)
    }

    /// Discard the current attempt and record why.
    pub fn reject(&mut self, kind: RejectionKind, reason: impl Into<String>) -> Result<(), CoreError> {
        self.transition(NodeStatus::Rejected)?;
        self.content = None;
        self.rejections.push(Rejection {
            attempt: self.attempts,
            kind,
            reason: reason.into(),
            at: Utc::now(),
        });
        Ok(())
    }

    /// Rejected -> Pending while retries remain, otherwise Rejected -> Failed.
    pub fn requeue(&mut self, max_retries: u32) -> Result<NodeStatus, CoreError> {
        let next = if self.attempts > max_retries {
            NodeStatus::Failed
        } else {
            NodeStatus::Pending
        };
        self.transition(next)?;
        Ok(next)
    }

    pub fn is_audited(&self) -> bool {
        self.status == NodeStatus::Audited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content() -> SceneContent {
        SceneContent {
            summary: "Alice meets the new student".into(),
            location: Some("classroom".into()),
            dialogue: vec![DialogueLine::narration("The bell rings.")],
            ..Default::default()
        }
    }

    #[test]
    fn test_happy_path_lifecycle() {
        let mut node = Node::new(NodeId::from("root"), "Opening");
        assert_eq!(node.begin_attempt().unwrap(), 1);
        node.store_draft(content()).unwrap();
        node.freeze().unwrap();
        assert!(node.is_audited());
        assert!(matches!(
            node.transition(NodeStatus::Rejected),
            Err(CoreError::Frozen(_))
        ));
    }

    #[test]
    fn test_reject_discards_content_and_requeues() {
        let mut node = Node::new(NodeId::from("n1"), "");
        node.begin_attempt().unwrap();
        node.store_draft(content()).unwrap();
        node.reject(RejectionKind::ConsistencyViolation, "outfit conflict")
            .unwrap();
        assert_eq!(node.status, NodeStatus::Rejected);
        assert!(node.content.is_none());
        assert_eq!(node.rejections.len(), 1);
        assert_eq!(node.rejections[0].attempt, 1);

        assert_eq!(node.requeue(2).unwrap(), NodeStatus::Pending);
    }

    #[test]
    fn test_requeue_fails_after_ceiling() {
        let mut node = Node::new(NodeId::from("n1"), "");
        for _ in 0..2 {
            node.begin_attempt().unwrap();
            node.reject(RejectionKind::ContentIntegrity, "bad speaker")
                .unwrap();
            if node.requeue(1).unwrap() == NodeStatus::Failed {
                break;
            }
        }
        assert_eq!(node.status, NodeStatus::Failed);
        assert_eq!(node.attempts, 2);
    }

    #[test]
    fn test_invalid_transition() {
        let mut node = Node::new(NodeId::from("n1"), "");
        let err = node.freeze().unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }
}
