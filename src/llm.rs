//! LLM completion boundary.
//!
//! [`CompletionClient`] is the seam the extractor talks to; [`OpenRouterClient`]
//! implements it over any OpenAI-compatible chat-completions endpoint
//! (OpenRouter by default, Groq or a local server via `base_url`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::prompt::SYSTEM_MESSAGE;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "meta-llama/llama-3.1-8b-instruct";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM client misconfigured: {0}")]
    Configuration(String),
    /// Timeouts, connection failures, 408, 429 and 5xx.
    #[error("LLM temporarily unavailable: {message}")]
    Transient {
        status: Option<u16>,
        message: String,
    },
    #[error("LLM request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("failed to decode LLM response: {0}")]
    Decode(String),
    #[error("LLM call exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transient { .. })
    }
}

/// Text returned by the model plus usage accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<Completion, LlmError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Usually supplied through `LLM_API_KEY` / `OPENROUTER_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Per-request timeout; the overall budget lives in the retry policy.
    pub request_timeout_secs: u64,
    pub max_tokens: u32,
    /// OpenRouter attribution headers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_referer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_title: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            request_timeout_secs: 30,
            max_tokens: 512,
            http_referer: None,
            x_title: None,
        }
    }
}

/// Chat-completions client for OpenAI-compatible providers.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    http_referer: Option<String>,
    x_title: Option<String>,
}

impl OpenRouterClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LlmError::Configuration("no API key configured".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            http_referer: config.http_referer.clone(),
            x_title: config.x_title.clone(),
        })
    }

    async fn send_request(&self, request: &ChatCompletionRequest) -> Result<Completion, LlmError> {
        debug!("Sending request to {}: model={}", self.endpoint, request.model);

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if let Some(referer) = &self.http_referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.x_title {
            builder = builder.header("X-Title", title);
        }

        let response = builder
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::Transient {
                status: None,
                message: format!("failed to send request: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, error_text));
        }

        let body = response.text().await.map_err(|e| LlmError::Transient {
            status: None,
            message: format!("failed to read response body: {}", e),
        })?;
        let response: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Decode(e.to_string()))?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Decode("response has no message content".to_string()))?;

        let (prompt_tokens, completion_tokens) = match &response.usage {
            Some(usage) => {
                info!(
                    "LLM response: {} tokens (prompt: {}, completion: {})",
                    usage.total_tokens.unwrap_or_default(),
                    usage.prompt_tokens.unwrap_or_default(),
                    usage.completion_tokens.unwrap_or_default()
                );
                (usage.prompt_tokens, usage.completion_tokens)
            }
            None => (None, None),
        };

        Ok(Completion {
            text,
            model: response.model.unwrap_or_else(|| self.model.clone()),
            prompt_tokens,
            completion_tokens,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenRouterClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<Completion, LlmError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![Message::system(SYSTEM_MESSAGE), Message::user(prompt)],
            temperature: 0.0,
            max_tokens: Some(self.max_tokens),
        };
        self.send_request(&request).await
    }
}

fn classify_status(status: StatusCode, body: String) -> LlmError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        body
    };
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        LlmError::Transient {
            status: Some(status.as_u16()),
            message,
        }
    } else {
        LlmError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: Role,
    content: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum Role {
    System,
    User,
}

impl Message {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Client replaying scripted outcomes in order, repeating the last one.
    pub struct ScriptedClient {
        outcomes: Mutex<VecDeque<Result<String, LlmError>>>,
        pub calls: AtomicUsize,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        pub fn new(outcomes: Vec<Result<String, LlmError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn replying(text: &str) -> Self {
            Self::new(vec![Ok(text.to_string())])
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    pub fn transient() -> LlmError {
        LlmError::Transient {
            status: Some(503),
            message: "overloaded".to_string(),
        }
    }

    fn replay(error: &LlmError) -> LlmError {
        match error {
            LlmError::Transient { status, message } => LlmError::Transient {
                status: *status,
                message: message.clone(),
            },
            LlmError::Rejected { status, message } => LlmError::Rejected {
                status: *status,
                message: message.clone(),
            },
            LlmError::Configuration(m) => LlmError::Configuration(m.clone()),
            LlmError::Decode(m) => LlmError::Decode(m.clone()),
            LlmError::DeadlineExceeded(d) => LlmError::DeadlineExceeded(*d),
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, prompt: &str) -> Result<Completion, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());

            let mut outcomes = self.outcomes.lock().unwrap();
            let outcome = if outcomes.len() > 1 {
                outcomes.pop_front()
            } else {
                outcomes.front().map(|o| match o {
                    Ok(text) => Ok(text.clone()),
                    Err(e) => Err(replay(e)),
                })
            };

            match outcome {
                Some(Ok(text)) => Ok(Completion {
                    text,
                    model: "scripted".to_string(),
                    prompt_tokens: Some(prompt.len() as u32 / 4),
                    completion_tokens: Some(40),
                }),
                Some(Err(e)) => Err(e),
                None => Err(LlmError::Decode("no scripted outcome".to_string())),
            }
        }
    }
}
