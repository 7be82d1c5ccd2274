//! HTTP client for a local Ollama server.
//!
//! Embeddings go through `/api/embed` (batched input), answers through
//! `/api/chat` with streaming disabled, and `/api/tags` tells the health
//! check which models are installed.

use std::time::Duration;

use async_trait::async_trait;
use localqa_core::{Embedder, Error, GenerationRequest, Generator, ModelStatus, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Request body for `/api/embed`.
#[derive(Debug, Serialize)]
pub struct OllamaEmbedRequest<'a> {
    pub model: &'a str,
    pub input: &'a [String],
}

/// Response body for `/api/embed`.
#[derive(Debug, Deserialize)]
pub struct OllamaEmbedResponse {
    pub embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OllamaMessage {
    pub role: String,
    pub content: String,
}

impl OllamaMessage {
    fn new(role: &str, content: &str) -> Self {
        Self { role: role.to_owned(), content: content.to_owned() }
    }
}

/// Sampling options; unset fields fall back to the model's defaults.
#[derive(Debug, Default, Serialize)]
pub struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

/// Request body for `/api/chat`.
#[derive(Debug, Serialize)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<OllamaMessage>,
    pub stream: bool,
    pub options: OllamaOptions,
}

/// Response body for a non-streaming `/api/chat` call.
#[derive(Debug, Deserialize)]
pub struct OllamaChatResponse {
    pub message: OllamaMessage,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub prompt_eval_count: usize,
    #[serde(default)]
    pub eval_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct OllamaListResponse {
    pub models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
pub struct OllamaModel {
    pub name: String,
}

/// Which kind of failure a transport error turns into.
#[derive(Debug, Clone, Copy)]
enum Service {
    Embedding,
    Generation,
}

impl Service {
    fn unavailable(self, message: String) -> Error {
        match self {
            Self::Embedding => Error::EmbeddingUnavailable(message),
            Self::Generation => Error::GenerationUnavailable(message),
        }
    }

    fn timeout(self, after: Duration) -> Error {
        match self {
            Self::Embedding => Error::EmbeddingTimeout(after),
            Self::Generation => Error::GenerationTimeout(after),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { client: Client::new(), base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<Req, Resp>(
        &self,
        path: &str,
        body: &Req,
        service: Service,
        timeout: Duration,
    ) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|err| transport_error(service, timeout, &url, &err))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(service.unavailable(format!("Ollama returned {status} for {path}: {}", detail.trim())));
        }

        response.json::<Resp>().await.map_err(|err| {
            if err.is_timeout() {
                service.timeout(timeout)
            } else {
                service.unavailable(format!("Failed to parse Ollama response from {path}: {err}"))
            }
        })
    }

    /// Names of the models installed on the server.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|err| transport_error(Service::Generation, HEALTH_TIMEOUT, &url, &err))?;
        if !response.status().is_success() {
            return Err(Error::GenerationUnavailable(format!("Ollama returned {}", response.status())));
        }
        let list: OllamaListResponse = response
            .json()
            .await
            .map_err(|err| Error::GenerationUnavailable(format!("Failed to parse model list: {err}")))?;
        Ok(list.models.into_iter().map(|m| m.name).collect())
    }

    /// Whether the server answers and lists `model`; an untagged name matches `:latest`.
    pub async fn model_status(&self, model: &str) -> ModelStatus {
        match self.list_models().await {
            Ok(names) if names.iter().any(|n| model_matches(n, model)) => ModelStatus::Ready,
            Ok(_) => ModelStatus::NotInstalled,
            Err(e) => {
                tracing::debug!(error = %e, "model service health check failed");
                ModelStatus::Unreachable
            }
        }
    }
}

fn model_matches(installed: &str, configured: &str) -> bool {
    installed == configured || (!configured.contains(':') && installed.strip_suffix(":latest") == Some(configured))
}

fn transport_error(service: Service, timeout: Duration, url: &str, err: &reqwest::Error) -> Error {
    if err.is_timeout() {
        service.timeout(timeout)
    } else if err.is_connect() {
        service.unavailable(format!("Cannot connect to Ollama at {url}. Is the Ollama server running?"))
    } else {
        service.unavailable(format!("Ollama request to {url} failed: {err}"))
    }
}

pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
    timeout: Duration,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self { client, model: model.into(), timeout: Duration::from_secs(60) }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = OllamaEmbedRequest { model: &self.model, input: texts };
        let response: OllamaEmbedResponse = self
            .client
            .post_json("/api/embed", &request, Service::Embedding, self.timeout)
            .await?;
        Ok(response.embeddings)
    }

    async fn status(&self) -> ModelStatus {
        self.client.model_status(&self.model).await
    }
}

pub struct OllamaGenerator {
    client: OllamaClient,
    model: String,
    timeout: Duration,
}

impl OllamaGenerator {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self { client, model: model.into(), timeout: Duration::from_secs(120) }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn chat_request(&self, request: &GenerationRequest) -> OllamaChatRequest {
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(OllamaMessage::new("system", &request.system));
        }
        messages.push(OllamaMessage::new("user", &request.prompt));
        OllamaChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: Some(request.config.temperature),
                num_ctx: request.config.num_ctx,
                num_predict: request.config.max_tokens,
            },
        }
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = self.chat_request(request);
        let response: OllamaChatResponse = self
            .client
            .post_json("/api/chat", &body, Service::Generation, self.timeout)
            .await?;
        tracing::debug!(
            model = %self.model,
            prompt_tokens = response.prompt_eval_count,
            output_tokens = response.eval_count,
            "generation finished"
        );
        Ok(response.message.content)
    }

    async fn status(&self) -> ModelStatus {
        self.client.model_status(&self.model).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use localqa_core::GenerationConfig;

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        assert_eq!(OllamaClient::new("http://host:1/").base_url(), "http://host:1");
    }

    #[test]
    fn untagged_model_names_match_latest() {
        assert!(model_matches("nomic-embed-text:latest", "nomic-embed-text"));
        assert!(model_matches("mistral:7b", "mistral:7b"));
        assert!(!model_matches("mistral:7b", "mistral"));
        assert!(!model_matches("nomic-embed-text:latest", "nomic-embed-text:v1.5"));
    }

    #[test]
    fn chat_request_carries_system_prompt_and_options() {
        let generator = OllamaGenerator::new(OllamaClient::new(DEFAULT_BASE_URL), "mistral");
        let request = GenerationRequest {
            system: "be brief".into(),
            prompt: "Q?".into(),
            config: GenerationConfig { temperature: 0.1, num_ctx: Some(2048), max_tokens: Some(64) },
        };
        let body = serde_json::to_value(generator.chat_request(&request)).unwrap();
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Q?");
        assert_eq!(body["options"]["num_ctx"], 2048);
        assert_eq!(body["options"]["num_predict"], 64);
    }

    #[test]
    fn unset_options_are_omitted() {
        let generator = OllamaGenerator::new(OllamaClient::new(DEFAULT_BASE_URL), "mistral");
        let request = GenerationRequest {
            system: String::new(),
            prompt: "Q?".into(),
            config: GenerationConfig { temperature: 0.0, num_ctx: None, max_tokens: None },
        };
        let body = serde_json::to_value(generator.chat_request(&request)).unwrap();
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
        assert!(body["options"].get("num_ctx").is_none());
        assert!(body["options"].get("num_predict").is_none());
    }
}
