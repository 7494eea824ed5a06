// ABOUTME: OpenAI-compatible chat completions backend (OpenAI, OpenRouter, local proxies)
// ABOUTME: Sends the persona system prompt plus history as named user messages

use super::{http_client, join_url, post_json};
use anyhow::Result;
use async_trait::async_trait;
use natter_core::config::BackendConfig;
use natter_core::prompt::{
    clean_prompt, reply_context, stop_markers, system_prompt, DEFAULT_STOP_MARKERS,
};
use natter_core::traits::{GenerationBackend, GenerationRequest};
use natter_core::BackendError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const COMPLETIONS_PATH: &str = "chat/completions";

/// Most stop sequences the chat completions API accepts
pub const MAX_STOP_SEQUENCES: usize = 4;

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<ChatCompletionMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionMessage {
    pub role: &'static str,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionResponse {
    /// Non-empty choice texts, or the error the API reported in a 200 body
    fn into_contents(self) -> Result<Vec<String>, BackendError> {
        if let Some(error) = self.error {
            return Err(BackendError::Malformed(format!("API error: {}", error)));
        }
        let contents: Vec<String> = self
            .choices
            .into_iter()
            .filter_map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .collect();
        if contents.is_empty() {
            return Err(BackendError::Empty);
        }
        Ok(contents)
    }
}

/// Participant names as accepted by the `name` field: `[A-Za-z0-9_-]{1,64}`
fn message_name(author: &str) -> Option<String> {
    let name: String = author
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    if name.trim_matches('_').is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Stop markers within the API limit, participant turns first
fn request_stop(participants: &[String]) -> Vec<String> {
    let mut markers = stop_markers(participants);
    let shift = DEFAULT_STOP_MARKERS.len().min(markers.len());
    markers.rotate_left(shift);
    markers.truncate(MAX_STOP_SEQUENCES);
    markers
}

pub struct OpenAiBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        Ok(Self {
            client: http_client(config)?,
            endpoint: join_url(base_url, COMPLETIONS_PATH),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn base_request(&self, messages: Vec<ChatCompletionMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: 1.0,
            stream: false,
            stop: Vec::new(),
        }
    }

    /// Request body for a reply turn
    pub fn build_request(&self, request: GenerationRequest<'_>) -> ChatCompletionRequest {
        let mut messages = vec![ChatCompletionMessage {
            role: "system",
            content: clean_prompt(&system_prompt(
                request.persona,
                request.memory_prompt,
                request.history,
            )),
            name: None,
        }];

        messages.extend(request.history.iter().map(|message| {
            let quote = if request.is_reply {
                reply_context(message)
            } else {
                String::new()
            };
            ChatCompletionMessage {
                role: "user",
                content: clean_prompt(&format!("{}{}", quote, message.content))
                    .trim()
                    .to_string(),
                name: message_name(&message.author),
            }
        }));

        ChatCompletionRequest {
            stop: request_stop(request.participants),
            ..self.base_request(messages)
        }
    }

    async fn complete(&self, body: &ChatCompletionRequest) -> Result<Vec<String>, BackendError> {
        let mut http = self.client.post(&self.endpoint);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response: ChatCompletionResponse = post_json(http, body).await?;
        response.into_contents()
    }

    /// Factory for [`BackendRegistry`](super::BackendRegistry)
    pub fn factory() -> impl Fn(&BackendConfig) -> Result<Arc<dyn GenerationBackend>> {
        |config| {
            let backend: Arc<dyn GenerationBackend> = Arc::new(Self::from_config(config)?);
            Ok(backend)
        }
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate_replies(
        &self,
        request: GenerationRequest<'_>,
    ) -> Result<Vec<String>, BackendError> {
        let body = self.build_request(request);
        tracing::debug!(
            endpoint = %self.endpoint,
            messages = body.messages.len(),
            "Requesting chat completion"
        );
        self.complete(&body).await
    }

    async fn summarize(&self, prompt: &str) -> Result<String, BackendError> {
        let body = self.base_request(vec![ChatCompletionMessage {
            role: "system",
            content: clean_prompt(prompt),
            name: None,
        }]);
        Ok(self.complete(&body).await?.join("\n"))
    }
}
