use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::ids::PersonaId;

/// Canonical descriptor of a character. Immutable once committed to the store;
/// amendments produce a new version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Persona {
    pub id: PersonaId,
    #[serde(default = "first_version")]
    pub version: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub background: String,
    pub appearance: Appearance,
    pub voice: Voice,
}

fn first_version() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Appearance {
    pub outfit: String,
    /// Base expressions the character is drawn with. Always contains `neutral`
    /// once committed.
    #[serde(default)]
    pub expressions: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub palette: Vec<String>,
}

impl Appearance {
    pub fn has_expression(&self, expression: &str) -> bool {
        self.expressions.contains(expression)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Voice {
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub register: SpeechRegister,
    /// Phrases this character never says.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbidden: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpeechRegister {
    #[default]
    Casual,
    Polite,
    Formal,
    Archaic,
    Terse,
}

impl std::fmt::Display for SpeechRegister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SpeechRegister::Casual => "casual",
            SpeechRegister::Polite => "polite",
            SpeechRegister::Formal => "formal",
            SpeechRegister::Archaic => "archaic",
            SpeechRegister::Terse => "terse",
        };
        f.write_str(s)
    }
}

/// A pinned reference to one version of a persona.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PersonaRef {
    pub id: PersonaId,
    pub version: u32,
}

impl std::fmt::Display for PersonaRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@v{}", self.id, self.version)
    }
}

impl Persona {
    pub fn reference(&self) -> PersonaRef {
        PersonaRef {
            id: self.id.clone(),
            version: self.version,
        }
    }

    /// One-paragraph description used in generation prompts.
    pub fn describe(&self) -> String {
        let mut out = format!("{} ({})", self.name, self.id);
        if !self.background.is_empty() {
            out.push_str(&format!(": {}", self.background));
        }
        out.push_str(&format!(
            "\n  Appearance: {}; palette: {}; expressions: {}",
            self.appearance.outfit,
            if self.appearance.palette.is_empty() {
                "-".to_string()
            } else {
                self.appearance.palette.join(", ")
            },
            self.appearance
                .expressions
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        ));
        out.push_str(&format!(
            "\n  Voice: {} register; traits: {}",
            self.voice.register,
            self.voice.traits.join(", ")
        ));
        if !self.voice.forbidden.is_empty() {
            out.push_str(&format!(
                "; never says: {}",
                self.voice.forbidden.join(", ")
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_defaults_from_minimal_json() {
        let json = r#"{
            "id": "alice",
            "name": "Alice",
            "appearance": { "outfit": "school uniform" },
            "voice": {}
        }"#;
        let persona: Persona = serde_json::from_str(json).unwrap();
        assert_eq!(persona.version, 1);
        assert_eq!(persona.voice.register, SpeechRegister::Casual);
        assert!(persona.appearance.expressions.is_empty());
    }

    #[test]
    fn test_persona_ref_display() {
        let r = PersonaRef {
            id: PersonaId::from("alice"),
            version: 3,
        };
        assert_eq!(r.to_string(), "alice@v3");
    }

    #[test]
    fn test_describe_mentions_forbidden_phrases() {
        let persona = Persona {
            id: PersonaId::from("kato"),
            version: 1,
            name: "Mr. Kato".into(),
            background: "Strict homeroom teacher".into(),
            appearance: Appearance {
                outfit: "grey suit".into(),
                expressions: ["neutral".to_string()].into_iter().collect(),
                palette: vec!["grey".into()],
            },
            voice: Voice {
                traits: vec!["stern".into()],
                register: SpeechRegister::Formal,
                forbidden: vec!["dude".into()],
            },
        };
        let text = persona.describe();
        assert!(text.contains("formal register"));
        assert!(text.contains("never says: dude"));
    }
}
