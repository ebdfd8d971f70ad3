use std::time::Duration;

use axum::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{config::GeneratorConfig, error::AppError};

#[derive(Debug, Clone)]
pub struct GenerationPrompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generator timed out")]
    Timeout,

    #[error("generator unavailable: {0}")]
    Unavailable(String),

    #[error("generator not configured: {0}")]
    NotConfigured(String),

    #[error("generator rejected the request: {0}")]
    Rejected(String),
}

impl From<GeneratorError> for AppError {
    fn from(err: GeneratorError) -> Self {
        match err {
            GeneratorError::Timeout | GeneratorError::Unavailable(_) => {
                AppError::Transient(err.to_string())
            }
            GeneratorError::NotConfigured(_) => AppError::Configuration(err.to_string()),
            GeneratorError::Rejected(_) => AppError::Internal(err.to_string()),
        }
    }
}

/// External text generator. Returns the raw completion text; parsing and
/// fallback to defaults happen in the scaffold service.
#[async_trait]
pub trait ScaffoldGenerator: Send + Sync {
    async fn complete(&self, prompt: &GenerationPrompt) -> Result<String, GeneratorError>;
}

/// Chat-completions client (OpenAI-compatible wire format).
pub struct HttpGenerator {
    client: reqwest::Client,
    config: GeneratorConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl HttpGenerator {
    pub fn new(config: GeneratorConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ScaffoldGenerator for HttpGenerator {
    async fn complete(&self, prompt: &GenerationPrompt) -> Result<String, GeneratorError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| GeneratorError::NotConfigured("GENERATOR_API_KEY is not set".into()))?;

        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: 0.4,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeneratorError::Timeout
                } else {
                    GeneratorError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(GeneratorError::NotConfigured(format!(
                "credentials rejected ({status})"
            )));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(GeneratorError::Unavailable(format!("upstream returned {status}")));
        }
        if !status.is_success() {
            return Err(GeneratorError::Rejected(format!("upstream returned {status}")));
        }

        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                GeneratorError::Timeout
            } else {
                GeneratorError::Unavailable(e.to_string())
            }
        })?;

        // An envelope we cannot read is handed on as-is; the scaffold parser
        // falls back to defaults for whatever it cannot use.
        let content = serde_json::from_str::<ChatResponse>(&text)
            .ok()
            .and_then(|r| r.choices.into_iter().next())
            .and_then(|c| c.message.content)
            .unwrap_or(text);

        Ok(content)
    }
}
