//! Relationship tracking and ending classification.
//!
//! Scenes carry affection deltas; a player's walk through the graph sums them
//! per persona. When the walk reaches an ending scene the highest affection
//! across the cast picks the kind of ending.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{AffectionChange, PersonaId};

pub const AFFECTION_MAX: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndingKind {
    Good,
    Normal,
    Bad,
}

impl std::fmt::Display for EndingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EndingKind::Good => "good",
            EndingKind::Normal => "normal",
            EndingKind::Bad => "bad",
        };
        f.write_str(s)
    }
}

/// Affection the closest persona must reach for each ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndingThresholds {
    pub good: i32,
    pub normal: i32,
}

impl Default for EndingThresholds {
    fn default() -> Self {
        Self {
            good: 80,
            normal: 50,
        }
    }
}

impl EndingThresholds {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(0..=AFFECTION_MAX).contains(&self.normal) || !(0..=AFFECTION_MAX).contains(&self.good)
        {
            return Err(CoreError::Config(format!(
                "ending thresholds must lie in 0..={AFFECTION_MAX}"
            )));
        }
        if self.normal > self.good {
            return Err(CoreError::Config(
                "the normal ending threshold may not exceed the good one".into(),
            ));
        }
        Ok(())
    }

    pub fn classify(&self, affection: &Affection) -> EndingKind {
        let best = affection.highest().map(|(_, v)| v).unwrap_or(0);
        if best >= self.good {
            EndingKind::Good
        } else if best >= self.normal {
            EndingKind::Normal
        } else {
            EndingKind::Bad
        }
    }
}

/// Running affection per persona, clamped to `0..=AFFECTION_MAX` after
/// every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Affection(BTreeMap<PersonaId, i32>);

impl Affection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, changes: &[AffectionChange]) {
        for change in changes {
            let value = self.0.entry(change.persona.clone()).or_insert(0);
            *value = value.saturating_add(change.delta).clamp(0, AFFECTION_MAX);
        }
    }

    pub fn get(&self, persona: &PersonaId) -> i32 {
        self.0.get(persona).copied().unwrap_or(0)
    }

    /// The persona the player is closest to. Ties go to the lowest ID.
    pub fn highest(&self) -> Option<(&PersonaId, i32)> {
        self.0
            .iter()
            .map(|(id, v)| (id, *v))
            .fold(None, |best, (id, v)| match best {
                Some((_, b)) if b >= v => best,
                _ => Some((id, v)),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PersonaId, i32)> {
        self.0.iter().map(|(id, v)| (id, *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(persona: &str, delta: i32) -> AffectionChange {
        AffectionChange {
            persona: PersonaId::from(persona),
            delta,
        }
    }

    #[test]
    fn test_affection_is_clamped() {
        let mut affection = Affection::new();
        affection.apply(&[change("hana", 70), change("hana", 50), change("kai", -20)]);
        assert_eq!(affection.get(&"hana".into()), 100);
        assert_eq!(affection.get(&"kai".into()), 0);
        assert_eq!(affection.get(&"ghost".into()), 0);
    }

    #[test]
    fn test_classify_by_highest_affection() {
        let thresholds = EndingThresholds::default();
        let mut affection = Affection::new();
        assert_eq!(thresholds.classify(&affection), EndingKind::Bad);

        affection.apply(&[change("hana", 30), change("kai", 55)]);
        assert_eq!(thresholds.classify(&affection), EndingKind::Normal);
        assert_eq!(affection.highest(), Some((&PersonaId::from("kai"), 55)));

        affection.apply(&[change("hana", 50)]);
        assert_eq!(thresholds.classify(&affection), EndingKind::Good);
    }

    #[test]
    fn test_highest_tie_goes_to_lowest_id() {
        let mut affection = Affection::new();
        affection.apply(&[change("kai", 40), change("hana", 40)]);
        assert_eq!(affection.highest(), Some((&PersonaId::from("hana"), 40)));
    }

    #[test]
    fn test_threshold_validation() {
        assert!(EndingThresholds::default().validate().is_ok());
        assert!(EndingThresholds { good: 40, normal: 60 }.validate().is_err());
        assert!(EndingThresholds { good: 120, normal: 50 }.validate().is_err());
    }
}
