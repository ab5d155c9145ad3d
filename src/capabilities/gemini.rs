//! Gemini `generateContent` client implementing [`LlmCapability`].

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{CapabilityError, CapabilityResult, LlmCapability, LlmContext};
use crate::LlmConfig;

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

/// Gemini API client
pub struct GeminiClient {
    client: Client,
    api_key: String,
    config: LlmConfig,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, config: LlmConfig) -> CapabilityResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CapabilityError::Permanent(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            config,
        })
    }

    /// Build a client from `GEMINI_API_KEY`
    pub fn from_env(config: LlmConfig) -> CapabilityResult<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| CapabilityError::Permanent(format!("{API_KEY_ENV} is not set")))?;
        Self::new(api_key, config)
    }

    fn build_request(&self, prompt: &str, context: Option<&LlmContext>) -> GenerateContentRequest {
        let mut parts = vec![Part::Text {
            text: prompt.to_string(),
        }];

        if let Some(ctx) = context {
            if let Some(data) = &ctx.data {
                let rendered =
                    serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
                parts.push(Part::Text {
                    text: format!("Context:\n{rendered}"),
                });
            }
            if let Some(png) = &ctx.screenshot_png {
                parts.push(Part::InlineData {
                    inline_data: InlineData {
                        mime_type: "image/png".to_string(),
                        data: BASE64.encode(png),
                    },
                });
            }
        }

        GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
        }
    }
}

/// Map a non-success HTTP status onto the capability error classes
fn classify_status(status: StatusCode, message: String) -> CapabilityError {
    match status.as_u16() {
        429 if message.to_lowercase().contains("quota") => {
            CapabilityError::Permanent(format!("quota exhausted: {message}"))
        }
        408 | 429 | 500 | 502 | 503 | 504 => {
            CapabilityError::Transient(format!("HTTP {}: {message}", status.as_u16()))
        }
        _ => CapabilityError::Permanent(format!("HTTP {}: {message}", status.as_u16())),
    }
}

#[async_trait]
impl LlmCapability for GeminiClient {
    async fn complete(&self, prompt: &str, context: Option<&LlmContext>) -> CapabilityResult<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            self.config.model
        );
        let request = self.build_request(prompt, context);

        debug!("Gemini generate_content: model={}", self.config.model);

        let send = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send();

        let limit = Duration::from_secs(self.config.timeout_secs);
        let response = tokio::time::timeout(limit, send)
            .await
            .map_err(|_| CapabilityError::timed_out("LLM request", limit))?
            .map_err(|e| CapabilityError::Transient(format!("LLM request failed: {}", e.without_url())))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CapabilityError::Transient(format!("Failed to read LLM response: {}", e.without_url())))?;

        if !status.is_success() {
            let message = match serde_json::from_str::<GeminiError>(&body) {
                Ok(e) => format!("{} {}", e.error.status, e.error.message).trim().to_string(),
                Err(_) => body,
            };
            warn!("Gemini returned {}", status);
            return Err(classify_status(status, message));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
            CapabilityError::Permanent(format!("Failed to parse LLM response: {e}"))
        })?;

        let text: String = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect();

        if text.trim().is_empty() {
            return Err(CapabilityError::Transient(
                "LLM returned an empty completion".to_string(),
            ));
        }

        Ok(text)
    }
}
