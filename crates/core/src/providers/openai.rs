//! OpenAI-compatible HTTP client for embeddings and chat completions.

use crate::embeddings::{EmbeddingProvider, DEFAULT_EMBEDDING_DIMENSIONS};
use crate::error::{RagError, Result};
use crate::traits::CompletionProvider;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

const PROVIDER: &str = "openai";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: Url,
    pub embedding_model: String,
    pub chat_model: String,
    pub dimensions: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(DEFAULT_BASE_URL)
            .map_err(|error| RagError::Input(format!("invalid base url: {error}")))?;

        Ok(Self {
            api_key: api_key.into(),
            base_url,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            max_tokens: 1000,
            temperature: 0.7,
            timeout: Duration::from_secs(60),
        })
    }

    /// Sets the API root. A trailing slash is added so relative joins keep the path.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        self.base_url = Url::parse(&normalized)
            .map_err(|error| RagError::Input(format!("invalid base url {base_url}: {error}")))?;
        Ok(self)
    }
}

pub struct OpenAiClient {
    http: Client,
    config: OpenAiConfig,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(RagError::Input("OpenAI API key must not be empty".to_string()));
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| RagError::provider(PROVIDER, error.to_string()))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.config
            .base_url
            .join(path)
            .map_err(|error| RagError::Input(format!("invalid endpoint {path}: {error}")))
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response> {
        let response = self
            .http
            .post(self.endpoint(path)?)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|error| {
                error!(provider = PROVIDER, %error, path, "request failed");
                RagError::provider(PROVIDER, format!("request failed: {error}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(provider = PROVIDER, %status, path, "API error");
            return Err(RagError::provider(
                PROVIDER,
                format!("API returned {status}: {}", error_detail(&body)),
            ));
        }

        Ok(response)
    }
}

fn error_detail(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| body.to_string())
}

fn parse_error(error: reqwest::Error) -> RagError {
    RagError::provider(PROVIDER, format!("failed to parse response: {error}"))
}

fn into_ordered_vectors(mut data: Vec<EmbeddingData>) -> Vec<Vec<f32>> {
    data.sort_by_key(|item| item.index);
    data.into_iter().map(|item| item.embedding).collect()
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::provider(PROVIDER, "API returned no embedding"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            provider = PROVIDER,
            batch_size = texts.len(),
            model = %self.config.embedding_model,
            "embedding batch"
        );

        let request = EmbeddingRequest {
            model: &self.config.embedding_model,
            input: texts,
        };
        let response: EmbeddingResponse = self
            .post("embeddings", &request)
            .await?
            .json()
            .await
            .map_err(parse_error)?;

        Ok(into_ordered_vectors(response.data))
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn complete(&self, system_prompt: &str, user_message: &str) -> Result<String> {
        let request = CompletionRequest {
            model: &self.config.chat_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_message,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response: CompletionResponse = self
            .post("chat/completions", &request)
            .await?
            .json()
            .await
            .map_err(parse_error)?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RagError::provider(PROVIDER, "API returned no completion"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_joins_keep_the_version_path() {
        let config = OpenAiConfig::new("sk-test")
            .unwrap()
            .with_base_url("http://localhost:8080/v1")
            .unwrap();
        let client = OpenAiClient::new(config).unwrap();

        assert_eq!(
            client.endpoint("chat/completions").unwrap().as_str(),
            "http://localhost:8080/v1/chat/completions"
        );
        assert_eq!(
            client.endpoint("embeddings").unwrap().as_str(),
            "http://localhost:8080/v1/embeddings"
        );
    }

    #[test]
    fn defaults_match_documented_models() {
        let config = OpenAiConfig::new("sk-test").unwrap();
        assert_eq!(config.embedding_model, "text-embedding-ada-002");
        assert_eq!(config.chat_model, "gpt-3.5-turbo");
        assert_eq!(config.dimensions, 1536);
        assert_eq!(config.max_tokens, 1000);
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let config = OpenAiConfig::new(" ").unwrap();
        assert!(matches!(OpenAiClient::new(config), Err(RagError::Input(_))));
    }

    #[test]
    fn completion_request_serializes_roles_in_order() {
        let request = CompletionRequest {
            model: "gpt-3.5-turbo",
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "context",
                },
                ChatMessage {
                    role: "user",
                    content: "question",
                },
            ],
            max_tokens: 1000,
            temperature: 0.7,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "question");
        assert_eq!(value["max_tokens"], 1000);
    }

    #[test]
    fn embedding_rows_are_reordered_by_index() {
        let response: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"index":1,"embedding":[0.5]},{"index":0,"embedding":[0.25]}]}"#,
        )
        .unwrap();

        assert_eq!(into_ordered_vectors(response.data), vec![vec![0.25], vec![0.5]]);
    }

    #[test]
    fn api_error_message_is_extracted() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        assert_eq!(error_detail(body), "Incorrect API key provided");
        assert_eq!(error_detail("gateway timeout"), "gateway timeout");
    }
}
