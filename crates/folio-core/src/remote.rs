//! Hosted generative-AI fallback.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chat_types::{render_transcript, ConversationMessage};
use crate::error::{Error, Result};

pub const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-flash-latest";

/// Stateless text generation over a full conversation history.
#[async_trait]
pub trait RemoteGenerator: Send + Sync {
    async fn generate(
        &self,
        history: &[ConversationMessage],
        system_instruction: &str,
    ) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub api_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub timeout_secs: Option<u64>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            temperature: 0.1,
            top_p: 0.95,
            top_k: 64,
            max_output_tokens: 2048,
            timeout_secs: None,
        }
    }
}

impl RemoteConfig {
    /// Defaults overridden by `GEMINI_API_KEY`, `GEMINI_MODEL`, `GEMINI_API_URL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(key) = non_empty_env("GEMINI_API_KEY") {
            config.api_key = Some(key);
        } else {
            warn!("GEMINI_API_KEY is not set; remote generation is unavailable");
        }
        if let Some(model) = non_empty_env("GEMINI_MODEL") {
            config.model = model;
        }
        if let Some(url) = non_empty_env("GEMINI_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }
        config
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    top_p: f64,
    top_k: u32,
    max_output_tokens: u32,
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
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

pub struct GeminiClient {
    config: RemoteConfig,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder
            .build()
            .map_err(|e| Error::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_url.trim_end_matches('/'),
            self.config.model
        )
    }

    fn build_request<'a>(
        &self,
        history: &[ConversationMessage],
        system_instruction: &'a str,
    ) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![RequestPart {
                    text: system_instruction.to_string(),
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![RequestPart {
                    text: render_transcript(history),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                top_k: self.config.top_k,
                max_output_tokens: self.config.max_output_tokens,
            },
        }
    }
}

fn extract_text(response: GenerateContentResponse) -> String {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default()
}

#[async_trait]
impl RemoteGenerator for GeminiClient {
    async fn generate(
        &self,
        history: &[ConversationMessage],
        system_instruction: &str,
    ) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Configuration("Remote API key is missing".to_string()))?;
        if history.is_empty() {
            return Err(Error::InvalidInput("conversation history is empty".to_string()));
        }

        let body = self.build_request(history, system_instruction);
        debug!(model = %self.config.model, turns = history.len(), "Calling remote generation API");

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateContentResponse = response.json().await?;
        Ok(extract_text(parsed))
    }
}
