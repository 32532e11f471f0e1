use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ids::{slugify, PersonaId};
use super::persona::PersonaRef;

/// Reference to a pose of one persona version, rendered as `persona@vN:pose`.
/// An amended persona gets its own images; older versions keep theirs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoseRef {
    pub persona: PersonaId,
    pub version: u32,
    pub pose: String,
}

impl PoseRef {
    pub fn new(persona: PersonaId, version: u32, pose: impl Into<String>) -> Self {
        Self {
            persona,
            version,
            pose: pose.into(),
        }
    }

    /// The pose `pose` of the exact version a line's speaker is pinned to.
    pub fn of(speaker: &PersonaRef, pose: impl Into<String>) -> Self {
        Self::new(speaker.id.clone(), speaker.version, pose)
    }

    pub fn key(&self) -> String {
        format!("{}@v{}:{}", self.persona, self.version, self.pose)
    }

    pub fn belongs_to(&self, speaker: &PersonaRef) -> bool {
        self.persona == speaker.id && self.version == speaker.version
    }
}

impl std::fmt::Display for PoseRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@v{}:{}", self.persona, self.version, self.pose)
    }
}

/// Opaque handle returned by an image provider (URL or file path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(pub String);

impl AssetRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AssetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub pose: PoseRef,
    pub asset: AssetRef,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// A background image for one story location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackgroundEntry {
    pub location: String,
    pub asset: AssetRef,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Catalog key of a location: its slug, so "School Gate" and "school gate" share art.
pub fn location_key(location: &str) -> String {
    slugify(location)
}

/// Cache of generated images. Poses are keyed by `persona@vN:pose`,
/// backgrounds by location slug. The first entry for a key wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssetCatalog {
    #[serde(default)]
    entries: BTreeMap<String, CatalogEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    backgrounds: BTreeMap<String, BackgroundEntry>,
}

impl AssetCatalog {
    pub fn get(&self, pose: &PoseRef) -> Option<&CatalogEntry> {
        self.entries.get(&pose.key())
    }

    pub fn contains(&self, pose: &PoseRef) -> bool {
        self.entries.contains_key(&pose.key())
    }

    /// Insert an entry. An existing entry for the same pose is kept; returns
    /// whether the entry was new.
    pub fn insert(&mut self, entry: CatalogEntry) -> bool {
        let key = entry.pose.key();
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, entry);
        true
    }

    pub fn background(&self, location: &str) -> Option<&BackgroundEntry> {
        self.backgrounds.get(&location_key(location))
    }

    pub fn contains_background(&self, location: &str) -> bool {
        self.backgrounds.contains_key(&location_key(location))
    }

    pub fn insert_background(&mut self, entry: BackgroundEntry) -> bool {
        let key = location_key(&entry.location);
        if self.backgrounds.contains_key(&key) {
            return false;
        }
        self.backgrounds.insert(key, entry);
        true
    }

    pub fn backgrounds(&self) -> impl Iterator<Item = &BackgroundEntry> {
        self.backgrounds.values()
    }

    /// Poses drawn for exactly this persona version.
    pub fn poses_for<'a>(
        &'a self,
        persona: &'a PersonaRef,
    ) -> impl Iterator<Item = &'a CatalogEntry> {
        self.entries.values().filter(move |e| e.pose.belongs_to(persona))
    }

    /// Number of pose images.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.backgrounds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(persona: &str, version: u32, pose: &str, asset: &str) -> CatalogEntry {
        CatalogEntry {
            pose: PoseRef::new(PersonaId::from(persona), version, pose),
            asset: AssetRef(asset.into()),
            description: String::new(),
        }
    }

    #[test]
    fn test_catalog_keeps_first_entry() {
        let mut catalog = AssetCatalog::default();
        assert!(catalog.insert(entry("alice", 1, "smile", "a.png")));
        assert!(!catalog.insert(entry("alice", 1, "smile", "b.png")));
        let pose = PoseRef::new(PersonaId::from("alice"), 1, "smile");
        assert_eq!(catalog.get(&pose).unwrap().asset.as_str(), "a.png");
        assert_eq!(pose.key(), "alice@v1:smile");
    }

    #[test]
    fn test_versions_do_not_share_poses() {
        let mut catalog = AssetCatalog::default();
        catalog.insert(entry("alice", 1, "smile", "v1.png"));
        let v2 = PoseRef::new(PersonaId::from("alice"), 2, "smile");
        assert!(!catalog.contains(&v2));
        assert!(catalog.insert(entry("alice", 2, "smile", "v2.png")));
        assert_eq!(catalog.get(&v2).unwrap().asset.as_str(), "v2.png");
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_poses_for_filters_by_persona_version() {
        let mut catalog = AssetCatalog::default();
        catalog.insert(entry("alice", 1, "smile", "a.png"));
        catalog.insert(entry("alice", 1, "angry", "b.png"));
        catalog.insert(entry("alice", 2, "smile", "c.png"));
        catalog.insert(entry("bob", 1, "smile", "d.png"));
        let alice = PersonaRef {
            id: PersonaId::from("alice"),
            version: 1,
        };
        assert_eq!(catalog.poses_for(&alice).count(), 2);
        assert_eq!(catalog.len(), 4);
    }

    #[test]
    fn test_backgrounds_keyed_by_location_slug() {
        let mut catalog = AssetCatalog::default();
        assert!(catalog.is_empty());
        assert!(catalog.insert_background(BackgroundEntry {
            location: "School Gate".into(),
            asset: AssetRef("gate.png".into()),
            description: String::new(),
        }));
        assert!(catalog.contains_background("school gate"));
        assert_eq!(catalog.background("school-gate").unwrap().asset.as_str(), "gate.png");
        assert!(!catalog.contains_background("rooftop"));
        assert!(!catalog.is_empty());
        assert_eq!(catalog.len(), 0);
    }
}
