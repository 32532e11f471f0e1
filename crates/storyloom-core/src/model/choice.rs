use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::ids::{EdgeId, NodeId};

/// A player-facing choice: a directed edge between two scenes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precondition: Option<Precondition>,
}

impl Edge {
    /// Precondition-gated edges mark deliberate narrative divergence.
    pub fn is_gated(&self) -> bool {
        self.precondition.is_some()
    }
}

/// Predicate over the choices a player has already taken.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Precondition {
    Taken(EdgeId),
    NotTaken(EdgeId),
    All(Vec<Precondition>),
    Any(Vec<Precondition>),
}

impl Precondition {
    pub fn evaluate(&self, taken: &HashSet<EdgeId>) -> bool {
        match self {
            Precondition::Taken(e) => taken.contains(e),
            Precondition::NotTaken(e) => !taken.contains(e),
            Precondition::All(ps) => ps.iter().all(|p| p.evaluate(taken)),
            Precondition::Any(ps) => ps.iter().any(|p| p.evaluate(taken)),
        }
    }

    /// Every edge this predicate mentions.
    pub fn referenced_edges(&self) -> Vec<&EdgeId> {
        match self {
            Precondition::Taken(e) | Precondition::NotTaken(e) => vec![e],
            Precondition::All(ps) | Precondition::Any(ps) => {
                ps.iter().flat_map(|p| p.referenced_edges()).collect()
            }
        }
    }
}

impl std::fmt::Display for Precondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Precondition::Taken(e) => write!(f, "taken({e})"),
            Precondition::NotTaken(e) => write!(f, "!taken({e})"),
            Precondition::All(ps) => {
                let parts: Vec<String> = ps.iter().map(|p| p.to_string()).collect();
                write!(f, "({})", parts.join(" && "))
            }
            Precondition::Any(ps) => {
                let parts: Vec<String> = ps.iter().map(|p| p.to_string()).collect();
                write!(f, "({})", parts.join(" || "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_evaluate() {
        let taken: HashSet<EdgeId> = [EdgeId::from("e1")].into_iter().collect();
        assert!(Precondition::Taken("e1".into()).evaluate(&taken));
        assert!(!Precondition::Taken("e2".into()).evaluate(&taken));
        assert!(Precondition::NotTaken("e2".into()).evaluate(&taken));

        let both = Precondition::All(vec![
            Precondition::Taken("e1".into()),
            Precondition::NotTaken("e2".into()),
        ]);
        assert!(both.evaluate(&taken));

        let either = Precondition::Any(vec![
            Precondition::Taken("e3".into()),
            Precondition::Taken("e4".into()),
        ]);
        assert!(!either.evaluate(&taken));
        assert_eq!(either.referenced_edges().len(), 2);
    }

    #[test]
    fn test_precondition_json_shape() {
        let p = Precondition::Taken("e3".into());
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"type":"taken","value":"e3"}"#);
        assert_eq!(p.to_string(), "taken(e3)");
    }
}
