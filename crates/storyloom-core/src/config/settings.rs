use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ending::EndingThresholds;
use crate::error::CoreError;

/// Knobs for a generation run. Stored inside the project file so a resumed
/// run uses the same budget it started with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Retries per node after the first attempt before it is marked failed.
    pub max_retries: u32,
    /// Concurrent node pipelines within one dependency level.
    pub workers: usize,
    /// Longest choice path from the root; scenes at this depth are endings.
    pub max_depth: usize,
    /// Hard cap on the number of scenes in the graph.
    pub max_scenes: usize,
    /// Most choices a single scene may offer.
    pub max_choices: usize,
    pub provider_timeout_secs: u64,
    /// Language the story is written in.
    pub language: String,
    /// Free-form style guidance passed to every stage.
    pub style: String,
    /// Affection needed for the good and normal endings.
    pub endings: EndingThresholds,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::default_init()
    }
}

impl RunConfig {
    /// Default config for `storyloom create`.
    pub fn default_init() -> Self {
        Self {
            max_retries: 2,
            workers: 4,
            max_depth: 4,
            max_scenes: 24,
            max_choices: 3,
            provider_timeout_secs: 120,
            language: "English".to_string(),
            style: "light-hearted slice of life".to_string(),
            endings: EndingThresholds::default(),
        }
    }

    /// Read a standalone config file (JSON). Missing keys take defaults.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.workers == 0 {
            return Err(CoreError::Config("workers must be at least 1".into()));
        }
        if self.max_scenes == 0 {
            return Err(CoreError::Config("max_scenes must be at least 1".into()));
        }
        if self.provider_timeout_secs == 0 {
            return Err(CoreError::Config(
                "provider_timeout_secs must be at least 1".into(),
            ));
        }
        self.endings.validate()
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}
