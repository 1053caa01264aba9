/// Gemini client: the only place that talks to the Google Generative Language API.
///
/// Handlers depend on the `TextAssistant` trait; `GeminiClient` is the
/// production implementation held in `AppState`.
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::GeminiConfig;

pub mod handlers;
pub mod prompts;

const MAX_RETRIES: u32 = 3;
const TEMPERATURE: f32 = 0.7;
const TOP_K: u32 = 40;
const TOP_P: f32 = 0.95;
const MAX_OUTPUT_TOKENS: u32 = 1024;

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("Gemini did not return any text")]
    EmptyContent,
}

#[async_trait]
pub trait TextAssistant: Send + Sync {
    /// Sends a single-turn prompt and returns the model's text.
    async fn generate(&self, prompt: &str) -> Result<String, GeminiError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
pub struct CandidatePart {
    pub text: Option<String>,
}

impl GenerateResponse {
    /// `candidates[0].content.parts[0].text`, if non-empty.
    pub fn text(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .first()?
            .text
            .as_deref()
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    error: GoogleErrorBody,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    message: String,
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(client: Client, config: GeminiConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl TextAssistant for GeminiClient {
    /// Retries on 429 and 5xx with exponential backoff.
    async fn generate(&self, prompt: &str) -> Result<String, GeminiError> {
        let request_body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                top_k: TOP_K,
                top_p: TOP_P,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };
        let url = self.endpoint();

        let mut last_error: Option<GeminiError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // 1s, 2s
                let delay = std::time::Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "Gemini call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&url)
                .query(&[("key", self.config.api_key.as_str())])
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(GeminiError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("Gemini API returned {}: {}", status, body);
                last_error = Some(GeminiError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<GoogleError>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(GeminiError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let parsed: GenerateResponse = response.json().await?;
            let text = parsed.text().ok_or(GeminiError::EmptyContent)?;
            debug!("Gemini call succeeded: {} chars", text.len());
            return Ok(text.to_string());
        }

        Err(retries_exhausted(last_error))
    }
}

/// The error reported once every attempt failed. A final 429 means Gemini is
/// still throttling us.
fn retries_exhausted(last_error: Option<GeminiError>) -> GeminiError {
    match last_error {
        None | Some(GeminiError::Api { status: 429, .. }) => GeminiError::RateLimited {
            retries: MAX_RETRIES,
        },
        Some(other) => other,
    }
}
