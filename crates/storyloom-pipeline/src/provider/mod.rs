//! Generation backends.
//!
//! The pipeline only sees the [`TextGenerator`] and [`ImageGenerator`] traits.
//! [`OpenAiProvider`] talks to any OpenAI-compatible endpoint;
//! [`OfflineStoryteller`] is deterministic and never touches the network.

pub mod offline;
pub mod openai;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use storyloom_core::model::{AssetRef, NodeId, PersonaId, PoseRef};

use crate::error::ProviderError;
use crate::judge::PersonaJudge;

pub use offline::OfflineStoryteller;
pub use openai::{OpenAiProvider, ProviderSettings};

/// Which agent is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Designer,
    Producer,
    Writer,
    Actor,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentRole::Designer => "designer",
            AgentRole::Producer => "producer",
            AgentRole::Writer => "writer",
            AgentRole::Actor => "actor",
        };
        f.write_str(s)
    }
}

/// Structured facts about a request. Remote providers only read the prompt;
/// the offline storyteller builds its answer from these.
#[derive(Debug, Clone, Default)]
pub struct RequestHints {
    pub node: Option<NodeId>,
    pub personas: Vec<PersonaId>,
    pub locations: Vec<String>,
    /// Most choices the producer may propose.
    pub max_choices: usize,
    pub summary: Option<String>,
    /// The line being rewritten (actor requests).
    pub line: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TextRequest {
    pub role: AgentRole,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    /// Ask for a JSON object instead of markup.
    pub json: bool,
    pub hints: RequestHints,
}

impl TextRequest {
    pub fn new(role: AgentRole, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            role,
            system: system.into(),
            prompt: prompt.into(),
            temperature: 0.8,
            json: false,
            hints: RequestHints::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_hints(mut self, hints: RequestHints) -> Self {
        self.hints = hints;
        self
    }
}

/// What an image shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSubject {
    /// A character sprite for one pose of one persona version.
    Pose(PoseRef),
    /// A scene background for a story location.
    Background(String),
}

impl std::fmt::Display for ImageSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageSubject::Pose(pose) => write!(f, "{pose}"),
            ImageSubject::Background(location) => write!(f, "background:{location}"),
        }
    }
}

/// Everything needed to draw one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescriptor {
    pub subject: ImageSubject,
    pub prompt: String,
}

impl ImageDescriptor {
    pub fn pose(pose: PoseRef, prompt: impl Into<String>) -> Self {
        Self {
            subject: ImageSubject::Pose(pose),
            prompt: prompt.into(),
        }
    }

    pub fn background(location: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            subject: ImageSubject::Background(location.into()),
            prompt: prompt.into(),
        }
    }

    /// Content hash used to name the stored image.
    pub fn digest(&self) -> String {
        format!(
            "{:x}",
            Sha256::digest(format!("{}\n{}", self.subject, self.prompt))
        )
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, request: &TextRequest) -> Result<String, ProviderError>;

    fn name(&self) -> &str;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, descriptor: &ImageDescriptor) -> Result<AssetRef, ProviderError>;

    fn name(&self) -> &str;
}

/// The backends and judge a run uses, with the per-call timeout applied.
#[derive(Clone)]
pub struct Providers {
    pub text: Arc<dyn TextGenerator>,
    pub image: Arc<dyn ImageGenerator>,
    pub judge: Arc<dyn PersonaJudge>,
    pub timeout: Duration,
}

impl Providers {
    pub fn new(
        text: Arc<dyn TextGenerator>,
        image: Arc<dyn ImageGenerator>,
        judge: Arc<dyn PersonaJudge>,
        timeout: Duration,
    ) -> Self {
        Self {
            text,
            image,
            judge,
            timeout,
        }
    }

    pub async fn generate_text(&self, request: &TextRequest) -> Result<String, ProviderError> {
        tracing::debug!("{} request via {}", request.role, self.text.name());
        with_timeout(self.timeout, self.text.generate_text(request)).await
    }

    pub async fn generate_image(
        &self,
        descriptor: &ImageDescriptor,
    ) -> Result<AssetRef, ProviderError> {
        tracing::debug!("Image request for {} via {}", descriptor.subject, self.image.name());
        with_timeout(self.timeout, self.image.generate_image(descriptor)).await
    }
}

/// Bound a provider call. An elapsed timer is a provider failure.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| ProviderError::Timeout(limit))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_maps_to_provider_error() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ProviderError>(())
        };
        let err = with_timeout(Duration::from_millis(10), slow).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[test]
    fn test_descriptor_digest_is_stable() {
        let d = ImageDescriptor::pose(PoseRef::new(PersonaId::from("hana"), 1, "smile"), "portrait");
        assert_eq!(d.digest(), d.clone().digest());
        assert_eq!(d.digest().len(), 64);
        let amended = ImageDescriptor::pose(PoseRef::new(PersonaId::from("hana"), 2, "smile"), "portrait");
        assert_ne!(d.digest(), amended.digest());
        let background = ImageDescriptor::background("hana", "portrait");
        assert_ne!(d.digest(), background.digest());
    }
}
