use crate::config::OllamaSettings;
use crate::error::{FinancialIngestError, Result};
use crate::inference::InferenceService;
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// [`InferenceService`] backed by a local Ollama server's `/api/generate` endpoint.
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    settings: OllamaSettings,
    json_mode: bool,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    eval_count: Option<u64>,
}

impl OllamaClient {
    pub fn new(settings: OllamaSettings) -> Self {
        Self {
            client: Client::new(),
            settings,
            json_mode: false,
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(OllamaSettings::from_env()?))
    }

    /// Asks the server to constrain output to JSON. Use a separate client for
    /// summaries, which are prose.
    pub fn json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }

    pub fn settings(&self) -> &OllamaSettings {
        &self.settings
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.settings.model,
            prompt,
            stream: false,
            format: self.json_mode.then_some("json"),
            options: GenerateOptions {
                temperature: self.settings.temperature,
            },
        }
    }
}

fn unavailable(context: &str, e: impl std::fmt::Display) -> FinancialIngestError {
    FinancialIngestError::CollaboratorUnavailable(format!("{}: {}", context, e))
}

/// Server errors and rate limiting may clear up; other statuses will not.
fn status_error(status: StatusCode, body: &str) -> FinancialIngestError {
    let details = format!("{} {}", status, body.trim());
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        unavailable("Ollama returned an error", details)
    } else {
        FinancialIngestError::InferenceRejected(format!("Ollama returned {}", details))
    }
}

#[async_trait]
impl InferenceService for OllamaClient {
    async fn infer(&self, prompt: &str, timeout: Duration) -> Result<String> {
        let start = Instant::now();
        let url = format!("{}/api/generate", self.settings.base_url);
        debug!("Sending request to Ollama model {}", self.settings.model);

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| unavailable("Ollama request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| unavailable("Unreadable Ollama response", e))?;

        debug!(
            "Ollama answered in {} ms ({} tokens)",
            start.elapsed().as_millis(),
            generated.eval_count.unwrap_or(0)
        );
        Ok(generated.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body() {
        let client = OllamaClient::new(OllamaSettings::default());
        let body = serde_json::to_value(client.request_body("hi")).unwrap();
        assert_eq!(body["model"], "llama3");
        assert_eq!(body["stream"], false);
        assert!(body.get("format").is_none());

        let client = client.json_mode(true);
        let body = serde_json::to_value(client.request_body("hi")).unwrap();
        assert_eq!(body["format"], "json");
        assert_eq!(body["prompt"], "hi");
    }

    #[test]
    fn test_only_transient_statuses_are_retryable() {
        let not_found =
            status_error(StatusCode::NOT_FOUND, r#"{"error":"model 'llama9' not found"}"#);
        assert!(matches!(
            not_found,
            FinancialIngestError::InferenceRejected(ref m) if m.contains("llama9")
        ));
        assert!(!not_found.is_retryable());
        assert!(!status_error(StatusCode::BAD_REQUEST, "").is_retryable());

        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "loading").is_retryable());
        assert!(status_error(StatusCode::INTERNAL_SERVER_ERROR, "").is_retryable());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_retryable() {
        let client = OllamaClient::new(OllamaSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            ..OllamaSettings::default()
        });
        let err = client
            .infer("hello", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
