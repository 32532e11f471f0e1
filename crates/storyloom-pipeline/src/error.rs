use std::time::Duration;

use thiserror::Error;

/// Failures talking to a text or image backend.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("API key not configured (set STORYLOOM_API_KEY or OPENAI_API_KEY, or use --offline)")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse provider response: {0}")]
    Parse(String),

    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Asset storage failed: {0}")]
    Storage(#[from] storyloom_core::CoreError),
}

/// Malformed script markup.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Unterminated <{0}> tag")]
    Unterminated(String),

    #[error("<{tag}> is missing the {attr:?} attribute")]
    MissingAttr { tag: String, attr: &'static str },

    #[error("Missing <{0}> section")]
    Missing(&'static str),

    #[error("Bad choice target {0:?} (expected new:<key> or existing:<node>)")]
    BadTarget(String),

    #[error("Bad precondition {0:?}")]
    BadPrecondition(String),

    #[error("Bad affection change {0:?} (expected a signed integer)")]
    BadAffection(String),
}

/// A stage broke its contract. Every variant is a content-integrity failure:
/// the attempt is discarded and the node is retried.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("{stage}: {reason}")]
    ContentIntegrity { stage: &'static str, reason: String },

    #[error("{stage}: provider failed: {source}")]
    Provider {
        stage: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("{stage}: malformed output: {source}")]
    Script {
        stage: &'static str,
        #[source]
        source: ScriptError,
    },
}

impl StageError {
    pub fn integrity(stage: &'static str, reason: impl Into<String>) -> Self {
        StageError::ContentIntegrity {
            stage,
            reason: reason.into(),
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            StageError::ContentIntegrity { stage, .. }
            | StageError::Provider { stage, .. }
            | StageError::Script { stage, .. } => stage,
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Core error: {0}")]
    Core(#[from] storyloom_core::CoreError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Invalid world seed: {0}")]
    Seed(String),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
