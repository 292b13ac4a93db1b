//! Remote embedding provider using the Gemini API
//!
//! `text-embedding-004` for vectors and a generation model for the short
//! summaries attached to captured knowledge.

use crate::embeddings::{EmbeddingProvider, DEFAULT_EMBEDDING_DIM};
use crate::error::{CirculateError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Request timeout duration
const REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";
const DEFAULT_SUMMARY_MODEL: &str = "gemini-pro";

/// Gemini embedding + summarization provider
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    summary_model: String,
    base_url: String,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: RequestContent,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<RequestContent>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// API error response
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl GeminiProvider {
    /// Create a new Gemini provider
    ///
    /// # Arguments
    /// * `api_key` - Gemini API key
    /// * `model` - Embedding model (defaults to "text-embedding-004")
    /// * `summary_model` - Generation model used for summaries (defaults to "gemini-pro")
    /// * `base_url` - API base URL
    /// * `dimensions` - Expected embedding length (defaults to 768)
    pub fn new(
        api_key: String,
        model: Option<String>,
        summary_model: Option<String>,
        base_url: Option<String>,
        dimensions: Option<usize>,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(CirculateError::Validation(
                "API key cannot be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            summary_model: summary_model.unwrap_or_else(|| DEFAULT_SUMMARY_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            dimensions: dimensions.unwrap_or(DEFAULT_EMBEDDING_DIM),
        })
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        url: String,
        body: &B,
    ) -> Result<R> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::OK => Ok(response.json::<R>().await?),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(CirculateError::LlmApi(
                "Invalid or missing API key".to_string(),
            )),
            StatusCode::TOO_MANY_REQUESTS => Err(CirculateError::LlmApi(
                "Gemini rate limit exceeded".to_string(),
            )),
            _ => {
                let error_msg = match response.json::<ErrorResponse>().await {
                    Ok(ErrorResponse {
                        error: Some(detail),
                    }) => detail.message,
                    _ => "Unknown error".to_string(),
                };
                Err(CirculateError::LlmApi(format!(
                    "API error (status {}): {}",
                    status, error_msg
                )))
            }
        }
    }

    /// Validate embedding dimensions and values
    fn validate_embedding(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimensions {
            return Err(CirculateError::Embedding(format!(
                "Expected {} dimensions, got {}",
                self.dimensions,
                embedding.len()
            )));
        }

        if embedding.iter().any(|&x| !x.is_finite()) {
            return Err(CirculateError::Embedding(
                "Embedding contains invalid values (NaN or Inf)".to_string(),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(CirculateError::Validation(
                "Text cannot be empty".to_string(),
            ));
        }

        debug!("Requesting embedding from {}", self.model);

        let request = EmbedRequest {
            model: format!("models/{}", self.model),
            content: RequestContent {
                parts: vec![Part {
                    text: text.to_string(),
                }],
            },
        };
        let url = format!("{}/models/{}:embedContent", self.base_url, self.model);
        let response: EmbedResponse = self.post(url, &request).await?;

        let embedding = response.embedding.values;
        self.validate_embedding(&embedding)?;
        Ok(embedding)
    }

    async fn summarize(&self, text: &str, instruction: &str) -> Result<String> {
        debug!("Requesting summary from {}", self.summary_model);

        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![Part {
                    text: format!("{}:\n\n{}", instruction, text),
                }],
            }],
        };
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, self.summary_model
        );
        let response: GenerateResponse = self.post(url, &request).await?;

        let summary: String = response
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if summary.trim().is_empty() {
            return Err(CirculateError::LlmApi("Empty response from API".to_string()));
        }

        Ok(summary)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
