use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Identifier of a scene in the branch graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

/// Identifier of a choice edge. Assigned by the graph as `e<n>` in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub String);

/// Identifier of a persona. Lowercase slug, stable across versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonaId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl EdgeId {
    pub fn from_index(index: usize) -> Self {
        Self(format!("e{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PersonaId {
    /// Parse and validate a persona ID: non-empty, `[a-z0-9_-]` only.
    pub fn parse(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        if s.is_empty() {
            return Err(CoreError::InvalidId("persona ID must not be empty".into()));
        }
        if let Some(bad) = s
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_'))
        {
            return Err(CoreError::InvalidId(format!(
                "persona ID {s:?} contains invalid character {bad:?}"
            )));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Turn free text (a producer-proposed scene key, a display name) into an ID slug.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_dash = true;
    for c in text.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if c == '_' {
            slug.push('_');
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

macro_rules! impl_id_conversions {
    ($ty:ident) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $ty {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $ty {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

impl_id_conversions!(NodeId);
impl_id_conversions!(EdgeId);
impl_id_conversions!(PersonaId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_id_parse_validation() {
        assert!(PersonaId::parse("alice").is_ok());
        assert!(PersonaId::parse("mr_kato-2").is_ok());
        assert!(PersonaId::parse("").is_err());
        assert!(PersonaId::parse("Alice").is_err());
        assert!(PersonaId::parse("al ice").is_err());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Library Confession!"), "library-confession");
        assert_eq!(slugify("  rooftop_lunch "), "rooftop_lunch");
        assert_eq!(slugify("???"), "");
    }

    #[test]
    fn test_edge_id_from_index() {
        assert_eq!(EdgeId::from_index(7).as_str(), "e7");
        assert_eq!(format!("{}", NodeId::from("root")), "root");
    }
}
