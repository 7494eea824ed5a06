// ABOUTME: KoboldAI text completion backend using the /api/v1/generate endpoint
// ABOUTME: Renders the whole conversation into one prompt and splits the completion per line

use super::{http_client, join_url, post_json};
use anyhow::Result;
use async_trait::async_trait;
use natter_core::config::BackendConfig;
use natter_core::prompt::{clean_prompt, render_history, stop_markers, system_prompt};
use natter_core::traits::{GenerationBackend, GenerationRequest};
use natter_core::BackendError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5001";
const GENERATE_PATH: &str = "api/v1/generate";

/// Sampler settings sent with every request
#[derive(Debug, Clone, Serialize)]
pub struct KoboldRequest {
    pub max_context_length: u32,
    pub max_length: u32,
    pub rep_pen: f32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub top_a: f32,
    pub typical: f32,
    pub tfs: f32,
    pub rep_pen_range: u32,
    pub rep_pen_slope: f32,
    pub sampler_order: Vec<u8>,
    pub memory: String,
    pub min_p: f32,
    pub presence_penalty: f32,
    pub prompt: String,
    pub quiet: bool,
    pub use_default_badwordsids: bool,
    pub stop_sequence: Vec<String>,
}

impl KoboldRequest {
    fn new(prompt: String, temperature: f32, max_length: u32) -> Self {
        Self {
            max_context_length: 4096,
            max_length,
            rep_pen: 1.1,
            temperature,
            top_p: 0.5,
            top_k: 0,
            top_a: 0.75,
            typical: 0.19,
            tfs: 0.97,
            rep_pen_range: 1024,
            rep_pen_slope: 0.7,
            sampler_order: vec![6, 5, 4, 3, 2, 1, 0],
            memory: String::new(),
            min_p: 0.0,
            presence_penalty: 0.0,
            prompt,
            quiet: false,
            use_default_badwordsids: false,
            stop_sequence: stop_markers(&[]),
        }
    }
}

#[derive(Debug, Deserialize)]
struct KoboldResponse {
    #[serde(default)]
    results: Vec<KoboldResult>,
}

#[derive(Debug, Deserialize)]
struct KoboldResult {
    text: String,
}

pub struct KoboldBackend {
    client: reqwest::Client,
    endpoint: String,
    temperature: f32,
    max_tokens: u32,
}

impl KoboldBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        Ok(Self {
            client: http_client(config)?,
            endpoint: join_url(base_url, GENERATE_PATH),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Request body for a reply turn, ending with the persona's open turn
    pub fn build_request(&self, request: GenerationRequest<'_>) -> KoboldRequest {
        let system = clean_prompt(&system_prompt(
            request.persona,
            request.memory_prompt,
            request.history,
        ));
        let history: Vec<String> = render_history(request.history, request.is_reply)
            .lines()
            .map(|line| clean_prompt(line).trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        let prompt = format!(
            "{}\n\n{}\n{}: ",
            system.trim(),
            history.join("\n"),
            request.persona.name
        );

        KoboldRequest {
            stop_sequence: stop_markers(request.participants),
            ..KoboldRequest::new(prompt, self.temperature, self.max_tokens)
        }
    }

    async fn complete(&self, body: &KoboldRequest) -> Result<String, BackendError> {
        let response: KoboldResponse = post_json(self.client.post(&self.endpoint), body).await?;
        let text = response
            .results
            .into_iter()
            .next()
            .map(|r| r.text)
            .ok_or(BackendError::Empty)?;
        if text.trim().is_empty() {
            return Err(BackendError::Empty);
        }
        Ok(text)
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
impl GenerationBackend for KoboldBackend {
    fn name(&self) -> &'static str {
        "kobold"
    }

    async fn generate_replies(
        &self,
        request: GenerationRequest<'_>,
    ) -> Result<Vec<String>, BackendError> {
        let body = self.build_request(request);
        tracing::debug!(endpoint = %self.endpoint, "Requesting Kobold completion");
        Ok(vec![self.complete(&body).await?])
    }

    async fn summarize(&self, prompt: &str) -> Result<String, BackendError> {
        let body = KoboldRequest::new(clean_prompt(prompt), self.temperature, self.max_tokens);
        self.complete(&body).await
    }

    fn splits_lines(&self) -> bool {
        true
    }
}
