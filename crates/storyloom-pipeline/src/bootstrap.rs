//! World bootstrap: the personas, title and locations a project starts with,
//! either read from a seed file or proposed by the designer agent.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use storyloom_core::config::RunConfig;
use storyloom_core::model::{Persona, PersonaId};
use storyloom_core::project::WorldInfo;
use storyloom_core::Project;

use crate::error::PipelineError;
use crate::provider::{AgentRole, Providers, TextRequest};

const DESIGNER_SYSTEM: &str = "You design the cast and setting of a branching visual novel. \
Answer with a single JSON object with the keys title, premise, locations and personas. \
Each persona has id (lowercase letters, digits, - or _), name, background, \
appearance {outfit, expressions, palette} and voice {traits, register, forbidden}. \
register is one of casual, polite, formal, archaic, terse.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldSeed {
    pub title: String,
    pub premise: String,
    #[serde(default)]
    pub locations: Vec<String>,
    pub personas: Vec<Persona>,
    /// Overrides the configured art and writing style.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

impl WorldSeed {
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        let seed: WorldSeed = serde_json::from_str(&text)?;
        seed.validate()?;
        Ok(seed)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.title.trim().is_empty() {
            return Err(PipelineError::Seed("title must not be empty".into()));
        }
        if self.personas.is_empty() {
            return Err(PipelineError::Seed("at least one persona is required".into()));
        }
        let mut seen = HashSet::new();
        for persona in &self.personas {
            PersonaId::parse(persona.id.as_str())
                .map_err(|e| PipelineError::Seed(e.to_string()))?;
            if !seen.insert(&persona.id) {
                return Err(PipelineError::Seed(format!("duplicate persona {}", persona.id)));
            }
            if persona.name.trim().is_empty() {
                return Err(PipelineError::Seed(format!("persona {} has no name", persona.id)));
            }
        }
        Ok(())
    }

    /// Build a new project with every persona committed at version 1 and a
    /// pending root scene.
    pub fn into_project(self, mut config: RunConfig) -> Result<Project, PipelineError> {
        self.validate()?;
        if let Some(style) = self.style {
            config.style = style;
        }
        let mut project = Project::new(
            WorldInfo {
                title: self.title,
                premise: self.premise,
                locations: self.locations,
            },
            config,
        );
        for persona in self.personas {
            project.personas.commit(persona)?;
        }
        project.ensure_root()?;
        tracing::info!(
            "Bootstrapped {:?} with {} persona(s)",
            project.world.title,
            project.personas.len()
        );
        Ok(project)
    }
}

/// Ask the designer agent for a world seed from a one-line brief.
pub async fn design(providers: &Providers, brief: &str) -> Result<WorldSeed, PipelineError> {
    let prompt = format!("World brief:\n{}\n", brief.trim());
    let request = TextRequest::new(AgentRole::Designer, DESIGNER_SYSTEM, prompt)
        .with_temperature(0.9)
        .json();
    let text = providers.generate_text(&request).await?;
    let seed: WorldSeed = serde_json::from_str(strip_fences(&text))
        .map_err(|e| PipelineError::Seed(format!("designer returned an unusable world: {e}")))?;
    seed.validate()?;
    tracing::info!("Designer proposed {:?}", seed.title);
    Ok(seed)
}

/// Models sometimes wrap JSON in a markdown code fence.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
