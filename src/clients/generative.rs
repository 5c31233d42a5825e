//! Generative language API client.
//!
//! Every call runs through the credential pool: quota answers rotate to the
//! next API key, anything else is returned as is.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::GenerativeConfig;
use crate::http::request::{RequestContext, X_CORRELATION_ID};
use crate::resilience::credentials::{CredentialPool, RetryError};

/// Credential header. Kept out of the URL so transport errors never carry it.
pub const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Error)]
pub enum GenerativeError {
    #[error("invalid base url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("generative request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success answer. The message body is what quota classification reads.
    #[error("generative API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("generative API returned no text")]
    EmptyResponse,

    #[error("all credentials exhausted after {attempts} attempt(s)")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<GenerativeError>,
    },
}

/// Parameters of one generation.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_output_tokens() -> u32 {
    500
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GenerateResponse {
    pub text: String,
    pub model: String,
}

// Wire format of generateContent.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    top_p: f32,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl ContentResponse {
    fn into_text(self) -> Option<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        (!text.is_empty()).then_some(text)
    }
}

#[derive(Debug)]
pub struct GenerativeClient {
    http: reqwest::Client,
    endpoint: Url,
    model: String,
    pool: Arc<CredentialPool>,
}

impl GenerativeClient {
    pub fn new(config: &GenerativeConfig, pool: Arc<CredentialPool>) -> Result<Self, GenerativeError> {
        let base = Url::parse(&config.base_url)?;
        let endpoint = base.join(&format!("v1beta/models/{}:generateContent", config.model))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint,
            model: config.model.clone(),
            pool,
        })
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// Generate text, rotating credentials on quota errors.
    pub async fn generate(
        &self,
        request: &GenerateRequest,
        context: &RequestContext,
    ) -> Result<GenerateResponse, GenerativeError> {
        let result = self
            .pool
            .execute_with_retry(move |key| self.generate_once(key, request, context))
            .await;

        match result {
            Ok(text) => Ok(GenerateResponse {
                text,
                model: self.model.clone(),
            }),
            Err(RetryError::Exhausted { attempts, source }) => Err(GenerativeError::Exhausted {
                attempts,
                source: Box::new(source),
            }),
            Err(RetryError::Operation(e)) => Err(e),
        }
    }

    async fn generate_once(
        &self,
        key: String,
        request: &GenerateRequest,
        context: &RequestContext,
    ) -> Result<String, GenerativeError> {
        let body = ContentRequest {
            contents: [Content {
                parts: [Part {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
                top_p: 0.95,
            },
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .header(API_KEY_HEADER, key.as_str())
            .header(X_CORRELATION_ID, &context.correlation_id)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerativeError::Status {
                status: status.as_u16(),
                message: message.chars().take(512).collect(),
            });
        }

        let parsed: ContentResponse = response.json().await?;
        let text = parsed.into_text().ok_or(GenerativeError::EmptyResponse)?;
        tracing::info!(
            correlation_id = %context.correlation_id,
            chars = text.len(),
            "Generative response received"
        );
        Ok(text)
    }
}
