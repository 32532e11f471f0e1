use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use storyloom_core::model::AssetRef;
use storyloom_core::storage::ProjectDir;

use super::{ImageDescriptor, ImageGenerator, TextGenerator, TextRequest};
use crate::error::ProviderError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub image_model: Option<String>,
}

/// Chat completions plus image generation over `reqwest`. Images are downloaded
/// into the project's asset directory under their SHA-256 name.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    image_model: String,
    assets: ProjectDir,
}

impl OpenAiProvider {
    pub fn new(settings: &ProviderSettings, assets: ProjectDir) -> Result<Self, ProviderError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ProviderError::NoApiKey)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            image_model: settings
                .image_model
                .clone()
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            assets,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, message });
        }
        Ok(response)
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
}

#[async_trait]
impl TextGenerator for OpenAiProvider {
    async fn generate_text(&self, request: &TextRequest) -> Result<String, ProviderError> {
        let mut body = json!({
            "model": self.model,
            "temperature": request.temperature,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
        });
        if request.json {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let parsed: ChatResponse = self
            .post("chat/completions", body)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ProviderError::Parse("response carried no message content".into()))?;
        tracing::debug!("{} response: {} chars", request.role, text.len());
        Ok(text)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[async_trait]
impl ImageGenerator for OpenAiProvider {
    async fn generate_image(&self, descriptor: &ImageDescriptor) -> Result<AssetRef, ProviderError> {
        let body = json!({
            "model": self.image_model,
            "prompt": descriptor.prompt,
            "n": 1,
            "size": "1024x1024",
            "response_format": "url",
        });
        let parsed: ImageResponse = self
            .post("images/generations", body)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let url = parsed
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or_else(|| ProviderError::Parse("image response carried no URL".into()))?;

        let bytes = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProviderError::Network(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let name = format!("{:x}.png", Sha256::digest(&bytes));
        let relative = self.assets.write_asset(&name, &bytes)?;
        tracing::info!("Stored image for {} as {relative}", descriptor.subject);
        Ok(AssetRef(relative))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_key_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let settings = ProviderSettings {
            api_key: Some("  ".into()),
            ..Default::default()
        };
        assert!(matches!(
            OpenAiProvider::new(&settings, ProjectDir::new(tmp.path())),
            Err(ProviderError::NoApiKey)
        ));
    }

    #[test]
    fn test_defaults_and_trailing_slash() {
        let tmp = TempDir::new().unwrap();
        let settings = ProviderSettings {
            api_key: Some("sk-test".into()),
            base_url: Some("http://localhost:8080/v1/".into()),
            ..Default::default()
        };
        let provider = OpenAiProvider::new(&settings, ProjectDir::new(tmp.path())).unwrap();
        assert_eq!(provider.base_url, "http://localhost:8080/v1");
        assert_eq!(provider.model(), DEFAULT_MODEL);
        assert_eq!(provider.image_model, DEFAULT_IMAGE_MODEL);
    }
}
