//! Model provider seam: chat completions, training-file upload and fine-tune job creation.
//!
//! `OpenAiProvider` speaks the OpenAI-compatible REST surface. Handlers only see the
//! `ModelProvider` trait so tests can substitute an in-memory provider.

use async_trait::async_trait;
use forensic_kernel::ChatMessage;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::ProviderSettings;
use crate::http_client;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("model provider API key is not configured")]
    MissingApiKey,
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("unexpected response from {url}: {detail}")]
    Malformed { url: String, detail: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Hyperparameters {
    pub n_epochs: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FineTuneJobRequest {
    pub model: String,
    pub training_file: String,
    pub hyperparameters: Hyperparameters,
}

/// Job descriptor as returned by the provider; unknown fields are dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, utoipa::ToSchema)]
pub struct FineTuneJob {
    pub id: String,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub training_file: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub fine_tuned_model: Option<String>,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;

    /// Uploads a JSONL training file and returns the provider's file id.
    async fn upload_training_file(
        &self,
        filename: &str,
        jsonl: Vec<u8>,
    ) -> Result<String, ProviderError>;

    async fn create_fine_tune_job(
        &self,
        request: &FineTuneJobRequest,
    ) -> Result<FineTuneJob, ProviderError>;
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self::new(
            http_client::client().clone(),
            &settings.base_url,
            settings.api_key.clone(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn key(&self) -> Result<&str, ProviderError> {
        self.api_key.as_deref().ok_or(ProviderError::MissingApiKey)
    }

    async fn send(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, ProviderError> {
        let resp = request.send().await.map_err(|source| ProviderError::Transport {
            url: url.to_string(),
            source,
        })?;
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|source| ProviderError::Transport {
            url: url.to_string(),
            source,
        })?;
        debug!(url, status = status.as_u16(), bytes = bytes.len(), "provider response");
        if !status.is_success() {
            return Err(ProviderError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        serde_json::from_slice::<Value>(&bytes).map_err(|e| ProviderError::Malformed {
            url: url.to_string(),
            detail: e.to_string(),
        })
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let key = self.key()?;
        let url = self.url("/v1/chat/completions");
        let body = self
            .send(&url, self.client.post(&url).bearer_auth(key).json(request))
            .await?;
        body.get("choices")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ProviderError::Malformed {
                url,
                detail: "missing choices[0].message.content".into(),
            })
    }

    async fn upload_training_file(
        &self,
        filename: &str,
        jsonl: Vec<u8>,
    ) -> Result<String, ProviderError> {
        let key = self.key()?;
        let url = self.url("/v1/files");
        let part = Part::bytes(jsonl)
            .file_name(filename.to_string())
            .mime_str("application/jsonl")
            .map_err(|source| ProviderError::Transport {
                url: url.clone(),
                source,
            })?;
        let form = Form::new().text("purpose", "fine-tune").part("file", part);
        let body = self
            .send(&url, self.client.post(&url).bearer_auth(key).multipart(form))
            .await?;
        body.get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ProviderError::Malformed {
                url,
                detail: "missing file id".into(),
            })
    }

    async fn create_fine_tune_job(
        &self,
        request: &FineTuneJobRequest,
    ) -> Result<FineTuneJob, ProviderError> {
        let key = self.key()?;
        let url = self.url("/v1/fine_tuning/jobs");
        let body = self
            .send(&url, self.client.post(&url).bearer_auth(key).json(request))
            .await?;
        serde_json::from_value(body).map_err(|e| ProviderError::Malformed {
            url,
            detail: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn provider(server: &MockServer) -> OpenAiProvider {
        OpenAiProvider::new(
            reqwest::Client::new(),
            &server.base_url(),
            Some("sk-test".to_string()),
        )
    }

    fn completion_request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-3.5-turbo".into(),
            messages: vec![
                ChatMessage::new("system", "You are an expert forensic engineer."),
                ChatMessage::new("user", "Generate the background section"),
            ],
            temperature: 0.7,
            max_tokens: 1000,
        }
    }

    #[tokio::test]
    async fn completion_returns_first_choice() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .json_body_partial(r#"{"model":"gpt-3.5-turbo","max_tokens":1000}"#);
                then.status(200).json_body(json!({
                    "choices": [{"message": {"role": "assistant", "content": "Section text"}}]
                }));
            })
            .await;

        let text = provider(&server)
            .complete(&completion_request())
            .await
            .expect("completion");
        assert_eq!(text, "Section text");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn completion_surfaces_provider_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(429).body("rate limited");
            })
            .await;

        let err = provider(&server)
            .complete(&completion_request())
            .await
            .expect_err("should fail");
        match err {
            ProviderError::Status { status, body, .. } => {
                assert_eq!(status, 429);
                assert_eq!(body, "rate limited");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn completion_without_choices_is_malformed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(json!({"choices": []}));
            })
            .await;

        let err = provider(&server)
            .complete(&completion_request())
            .await
            .expect_err("should fail");
        assert!(matches!(err, ProviderError::Malformed { .. }));
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let provider = OpenAiProvider::new(reqwest::Client::new(), "http://127.0.0.1:9", None);
        let err = provider
            .complete(&completion_request())
            .await
            .expect_err("should fail");
        assert!(matches!(err, ProviderError::MissingApiKey));
    }

    #[tokio::test]
    async fn upload_posts_multipart_with_purpose() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/files")
                    .header("authorization", "Bearer sk-test")
                    .body_contains("fine-tune")
                    .body_contains("fine_tune_data.jsonl");
                then.status(200)
                    .json_body(json!({"id": "file-abc", "object": "file"}));
            })
            .await;

        let id = provider(&server)
            .upload_training_file("fine_tune_data.jsonl", b"{\"messages\":[]}".to_vec())
            .await
            .expect("upload");
        assert_eq!(id, "file-abc");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn job_creation_sends_epochs_and_parses_descriptor() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/fine_tuning/jobs")
                    .json_body(json!({
                        "model": "gpt-3.5-turbo",
                        "training_file": "file-abc",
                        "hyperparameters": {"n_epochs": 2}
                    }));
                then.status(200).json_body(json!({
                    "id": "ftjob-123",
                    "object": "fine_tuning.job",
                    "model": "gpt-3.5-turbo",
                    "status": "validating_files",
                    "training_file": "file-abc",
                    "created_at": 1_700_000_000,
                    "fine_tuned_model": null,
                    "organization_id": "org-x"
                }));
            })
            .await;

        let job = provider(&server)
            .create_fine_tune_job(&FineTuneJobRequest {
                model: "gpt-3.5-turbo".into(),
                training_file: "file-abc".into(),
                hyperparameters: Hyperparameters { n_epochs: 2 },
            })
            .await
            .expect("job");
        assert_eq!(job.id, "ftjob-123");
        assert_eq!(job.status.as_deref(), Some("validating_files"));
        assert!(job.fine_tuned_model.is_none());
        mock.assert_async().await;
    }
}
