// src/services/model_client.rs
use crate::models::ModelProfile;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const UNKNOWN_DETAIL_LIMIT: usize = 120;

#[derive(Debug, Clone)]
pub struct InlineImage {
    pub mime_type: &'static str,
    pub data: Bytes,
}

/// One provider call: optional system instruction, a text prompt, inline images
/// and, in schema mode, the structured output schema.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub system_instruction: Option<String>,
    pub prompt: String,
    pub images: Vec<InlineImage>,
    pub response_schema: Option<Value>,
}

/// Failure reported by the provider boundary, tagged by cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("unavailable in this region: {0}")]
    Unavailable(String),
    #[error("model overloaded: {0}")]
    Overloaded(String),
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("{0}")]
    Unknown(String),
}

impl ProviderError {
    /// Tags a non-success HTTP response.
    pub fn from_response(status: u16, body: &str) -> Self {
        let detail = error_detail(body);
        let lower = body.to_ascii_lowercase();

        if lower.contains("location is not supported")
            || lower.contains("user location")
            || lower.contains("failed_precondition")
        {
            return ProviderError::Unavailable(detail);
        }
        match status {
            429 => ProviderError::RateLimited(detail),
            401 | 403 => ProviderError::Forbidden(detail),
            404 => ProviderError::ModelNotFound(detail),
            413 => ProviderError::PayloadTooLarge(detail),
            503 | 529 => ProviderError::Overloaded(detail),
            _ if lower.contains("api key not valid") || lower.contains("permission_denied") => {
                ProviderError::Forbidden(detail)
            }
            _ if lower.contains("resource_exhausted") || lower.contains("quota") => {
                ProviderError::RateLimited(detail)
            }
            _ if lower.contains("overloaded") => ProviderError::Overloaded(detail),
            _ => ProviderError::Unknown(format!("HTTP {}: {}", status, detail)),
        }
    }

    /// Message shown to the user when this was the last failure of a chain.
    pub fn user_message(&self) -> String {
        match self {
            ProviderError::RateLimited(_) => {
                "Request quota exceeded (429). Wait a minute and retry, or switch to another profile."
                    .to_string()
            }
            ProviderError::Forbidden(_) => {
                "The API key is invalid or forbidden (403). Check the key and its permissions."
                    .to_string()
            }
            ProviderError::Unavailable(_) => {
                "The model service is not available in your region. Try a proxy base URL."
                    .to_string()
            }
            ProviderError::Overloaded(_) => {
                "The model is overloaded (503). Please try again shortly.".to_string()
            }
            ProviderError::ModelNotFound(_) => {
                "None of the configured model names were found. Check the profile's model list."
                    .to_string()
            }
            ProviderError::PayloadTooLarge(_) => {
                "The images are too large for the model provider (413). Try smaller screenshots."
                    .to_string()
            }
            ProviderError::Network(_) => {
                "Could not reach the model provider. Check your network connection or base URL."
                    .to_string()
            }
            ProviderError::Unknown(detail) => {
                format!("Analysis failed: {}", truncate(detail, UNKNOWN_DETAIL_LIMIT))
            }
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            ProviderError::Network(e.to_string())
        } else {
            ProviderError::Unknown(e.to_string())
        }
    }
}

fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

pub(crate) fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let head: String = text.chars().take(limit).collect();
    format!("{}…", head)
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Sends one request to `model` using the credentials of `profile` and
    /// returns the response text, which may be empty.
    async fn generate(
        &self,
        profile: &ModelProfile,
        model: &str,
        request: &GenerateRequest,
    ) -> Result<String, ProviderError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Client for the Generative Language `generateContent` REST endpoint.
pub struct GeminiClient {
    client: Client,
}

impl GeminiClient {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    fn endpoint(base_url: Option<&str>, model: &str) -> String {
        let base = base_url
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        let model = model.trim_start_matches("models/");
        format!("{}/v1beta/models/{}:generateContent", base, model)
    }

    fn build_body(request: &GenerateRequest) -> Value {
        let mut parts = vec![json!({ "text": request.prompt })];
        parts.extend(request.images.iter().map(|image| {
            json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": general_purpose::STANDARD.encode(&image.data)
                }
            })
        }));

        let mut generation_config = json!({ "temperature": 0.2 });
        if let Some(schema) = &request.response_schema {
            generation_config["responseMimeType"] = json!("application/json");
            generation_config["responseSchema"] = schema.clone();
        }

        let mut body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config
        });
        if let Some(system) = &request.system_instruction {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        body
    }

    fn response_text(raw: &str) -> Result<String, ProviderError> {
        let parsed: GenerateResponse = serde_json::from_str(raw).map_err(|e| {
            ProviderError::Unknown(format!("Failed to parse provider response: {}", e))
        })?;

        if parsed.candidates.is_empty() {
            if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
                return Err(ProviderError::Unknown(format!(
                    "Request blocked by the provider: {}",
                    reason
                )));
            }
        }

        Ok(parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn generate(
        &self,
        profile: &ModelProfile,
        model: &str,
        request: &GenerateRequest,
    ) -> Result<String, ProviderError> {
        let endpoint = Self::endpoint(profile.base_url.as_deref(), model);
        debug!(
            "POST {} (schema: {}, images: {})",
            endpoint,
            request.response_schema.is_some(),
            request.images.len()
        );

        let response = self
            .client
            .post(&endpoint)
            .header("x-goog-api-key", profile.api_key.trim())
            .json(&Self::build_body(request))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::from_response(status.as_u16(), &text));
        }
        Self::response_text(&text)
    }
}
