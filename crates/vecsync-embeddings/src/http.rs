//! HTTP embedding provider for Ollama and OpenAI-compatible endpoints.
//!
//! One request per call: the whole input list goes out as a single batch.
//! Transient failures (transport errors, timeouts, 429, 5xx) are retried
//! with exponential backoff up to `max_retries` attempts.

use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use vecsync_types::{ProviderKind, Settings};

use crate::error::EmbeddingError;
use crate::model::{Embedding, EmbeddingProvider, EmbeddingRole, ModelInfo, RolePrefixes};

/// Configuration for the HTTP embedder.
#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    /// Which API flavour to speak
    pub kind: ProviderKind,

    /// API base URL (e.g., "http://localhost:11434")
    pub base_url: String,

    /// Model to use (e.g., "nomic-embed-text")
    pub model: String,

    /// Expected embedding dimension
    pub dimension: usize,

    /// API key (OpenAI-compatible endpoints)
    pub api_key: Option<SecretString>,

    /// Role markers
    pub prefixes: RolePrefixes,

    /// Request timeout
    pub timeout: Duration,

    /// Maximum attempts per call
    pub max_retries: u32,
}

impl HttpEmbedderConfig {
    /// Create config for a local Ollama server.
    pub fn ollama(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            kind: ProviderKind::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: model.into(),
            dimension,
            api_key: None,
            prefixes: RolePrefixes::default(),
            timeout: Duration::from_secs(60),
            max_retries: 3,
        }
    }

    /// Create config for an OpenAI-compatible API.
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            kind: ProviderKind::Openai,
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
            dimension,
            api_key: Some(SecretString::from(api_key.into())),
            prefixes: RolePrefixes::new("", ""),
            timeout: Duration::from_secs(60),
            max_retries: 3,
        }
    }

    /// Build from application settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            kind: settings.provider,
            base_url: settings.provider_url.trim_end_matches('/').to_string(),
            model: settings.model_name.clone(),
            dimension: settings.embedding_size,
            api_key: settings.api_key.clone().map(SecretString::from),
            prefixes: RolePrefixes::new(
                settings.document_prefix.clone(),
                settings.query_prefix.clone(),
            ),
            timeout: Duration::from_secs(settings.request_timeout_secs),
            max_retries: settings.max_retries.max(1),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_prefixes(mut self, prefixes: RolePrefixes) -> Self {
        self.prefixes = prefixes;
        self
    }
}

/// Embedding provider talking to a remote or local embedding service.
pub struct HttpEmbedder {
    client: Client,
    config: HttpEmbedderConfig,
    info: ModelInfo,
}

impl HttpEmbedder {
    /// Create a new HTTP embedder.
    pub fn new(config: HttpEmbedderConfig) -> Result<Self, EmbeddingError> {
        if config.kind == ProviderKind::Openai && config.api_key.is_none() {
            return Err(EmbeddingError::Config(
                "openai provider requires an api key".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EmbeddingError::Config(e.to_string()))?;

        let info = ModelInfo {
            name: config.model.clone(),
            dimension: config.dimension,
        };

        Ok(Self {
            client,
            config,
            info,
        })
    }

    /// Call the API with retry logic.
    async fn call_api(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        };

        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(attempt = attempts, inputs = inputs.len(), "Calling embedding API");

            match self.make_request(inputs).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    if !e.is_transient() || attempts >= self.config.max_retries {
                        error!(error = %e, attempts = attempts, "Embedding call failed");
                        return Err(e);
                    }

                    match backoff.next_backoff() {
                        Some(duration) => {
                            warn!(
                                error = %e,
                                retry_in_ms = duration.as_millis(),
                                "Embedding call failed, retrying"
                            );
                            tokio::time::sleep(duration).await;
                        }
                        None => {
                            error!(error = %e, "Backoff exhausted");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    async fn make_request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match self.config.kind {
            ProviderKind::Ollama => self.make_ollama_request(inputs).await,
            ProviderKind::Openai => self.make_openai_request(inputs).await,
        }
    }

    /// POST {base_url}/api/embed
    async fn make_ollama_request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        #[derive(Serialize)]
        struct OllamaRequest<'a> {
            model: &'a str,
            input: &'a [String],
        }

        #[derive(Deserialize)]
        struct OllamaResponse {
            embeddings: Vec<Vec<f32>>,
        }

        let request = OllamaRequest {
            model: &self.config.model,
            input: inputs,
        };

        let url = format!("{}/api/embed", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;

        let response = check_status(response).await?;

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Parse(e.to_string()))?;

        Ok(body.embeddings)
    }

    /// POST {base_url}/embeddings
    async fn make_openai_request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        #[derive(Serialize)]
        struct OpenAIRequest<'a> {
            model: &'a str,
            input: &'a [String],
        }

        #[derive(Deserialize)]
        struct OpenAIResponse {
            data: Vec<OpenAIEmbedding>,
        }

        #[derive(Deserialize)]
        struct OpenAIEmbedding {
            index: usize,
            embedding: Vec<f32>,
        }

        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| EmbeddingError::Config("missing api key".to_string()))?;

        let request = OpenAIRequest {
            model: &self.config.model,
            input: inputs,
        };

        let url = format!("{}/embeddings", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;

        let response = check_status(response).await?;

        let mut body: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Parse(e.to_string()))?;

        // Entries may arrive out of order; `index` refers to the input position
        body.data.sort_by_key(|d| d.index);
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Map HTTP status codes onto the error taxonomy.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, EmbeddingError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.as_u16() == 429 {
        return Err(EmbeddingError::RateLimited);
    }

    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        Err(EmbeddingError::Request(format!("HTTP {}: {}", status, body)))
    } else {
        // 4xx other than 429 will not get better by retrying
        Err(EmbeddingError::InvalidInput(format!("HTTP {}: {}", status, body)))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    async fn embed(
        &self,
        texts: &[String],
        role: EmbeddingRole,
    ) -> Result<Vec<Embedding>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let inputs: Vec<String> = texts
            .iter()
            .map(|t| self.config.prefixes.apply(role, t))
            .collect();

        let vectors = self.call_api(&inputs).await?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }

        debug!(count = vectors.len(), role = %role, "Embedded texts");
        Ok(vectors.into_iter().map(Embedding::new).collect())
    }
}
