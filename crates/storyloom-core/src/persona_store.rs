use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{Persona, PersonaId, PersonaRef};

/// Single source of truth for character descriptors.
///
/// Every committed version is kept forever. Scenes pin a [`PersonaRef`], so
/// amending a persona never changes content that was already generated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersonaStore {
    #[serde(default)]
    versions: BTreeMap<PersonaId, Vec<Persona>>,
}

impl PersonaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a new persona as version 1. Fails if the ID is taken.
    pub fn commit(&mut self, mut persona: Persona) -> Result<PersonaRef, CoreError> {
        if self.versions.contains_key(&persona.id) {
            return Err(CoreError::PersonaExists(persona.id));
        }
        persona.version = 1;
        persona.appearance.expressions.insert("neutral".to_string());
        let reference = persona.reference();
        tracing::debug!("Committed persona {reference}");
        self.versions.insert(persona.id.clone(), vec![persona]);
        Ok(reference)
    }

    /// Create the next version of a persona from its latest one.
    pub fn amend<F>(&mut self, id: &PersonaId, change: F) -> Result<PersonaRef, CoreError>
    where
        F: FnOnce(&mut Persona),
    {
        let history = self
            .versions
            .get_mut(id)
            .ok_or_else(|| CoreError::PersonaNotFound {
                id: id.clone(),
                version: None,
            })?;
        let latest = history.last().ok_or_else(|| CoreError::PersonaNotFound {
            id: id.clone(),
            version: None,
        })?;
        let mut next = latest.clone();
        change(&mut next);
        next.id = id.clone();
        next.version = latest.version + 1;
        next.appearance.expressions.insert("neutral".to_string());
        let reference = next.reference();
        tracing::info!("Amended persona {reference}");
        history.push(next);
        Ok(reference)
    }

    /// Look up the exact version a reference pins.
    pub fn get(&self, reference: &PersonaRef) -> Option<&Persona> {
        self.versions
            .get(&reference.id)?
            .iter()
            .find(|p| p.version == reference.version)
    }

    pub fn latest(&self, id: &PersonaId) -> Option<&Persona> {
        self.versions.get(id)?.last()
    }

    /// Resolve an ID to a reference pinned at the latest version.
    pub fn resolve(&self, id: &PersonaId) -> Result<PersonaRef, CoreError> {
        self.latest(id)
            .map(Persona::reference)
            .ok_or_else(|| CoreError::PersonaNotFound {
                id: id.clone(),
                version: None,
            })
    }

    /// Like [`get`](Self::get) but as an error for callers that propagate.
    pub fn require(&self, reference: &PersonaRef) -> Result<&Persona, CoreError> {
        self.get(reference).ok_or_else(|| CoreError::PersonaNotFound {
            id: reference.id.clone(),
            version: Some(reference.version),
        })
    }

    pub fn contains(&self, id: &PersonaId) -> bool {
        self.versions.contains_key(id)
    }

    pub fn versions(&self, id: &PersonaId) -> &[Persona] {
        self.versions.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Latest version of every persona, ordered by ID.
    pub fn iter_latest(&self) -> impl Iterator<Item = &Persona> {
        self.versions.values().filter_map(|v| v.last())
    }

    /// Every committed version, ordered by ID and then version.
    pub fn iter_all(&self) -> impl Iterator<Item = &Persona> {
        self.versions.values().flatten()
    }

    pub fn ids(&self) -> impl Iterator<Item = &PersonaId> {
        self.versions.keys()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
