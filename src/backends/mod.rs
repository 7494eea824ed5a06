// ABOUTME: HTTP generation backends and the registry that builds them from config
// ABOUTME: Shared reqwest plumbing maps transport and status failures onto BackendError

pub mod kobold;
pub mod openai;
pub mod registry;

pub use kobold::KoboldBackend;
pub use openai::OpenAiBackend;
pub use registry::BackendRegistry;

use anyhow::{Context, Result};
use natter_core::config::BackendConfig;
use natter_core::BackendError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Build the HTTP client shared by a backend's requests
pub(crate) fn http_client(config: &BackendConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

/// Join a base URL and an API path without doubling slashes
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// POST a JSON body and decode a JSON response
pub(crate) async fn post_json<B, R>(
    request: reqwest::RequestBuilder,
    body: &B,
) -> Result<R, BackendError>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let started = std::time::Instant::now();
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| BackendError::Transport(e.to_string()))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| BackendError::Transport(e.to_string()))?;
    tracing::debug!(
        status = status.as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Backend responded"
    );

    if !status.is_success() {
        return Err(BackendError::Status {
            status: status.as_u16(),
            body: text,
        });
    }
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("http://localhost:5001/", "/api/v1/generate"),
            "http://localhost:5001/api/v1/generate"
        );
        assert_eq!(
            join_url("https://openrouter.ai/api/v1", "chat/completions"),
            "https://openrouter.ai/api/v1/chat/completions"
        );
    }
}
