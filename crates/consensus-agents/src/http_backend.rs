//! Backend over an OpenAI-compatible `/chat/completions` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use coordination::{Backend, BackendError, BackendId, BackendPool};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

use crate::config::{AgentsConfig, Endpoint};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

pub struct HttpBackend {
    id: BackendId,
    endpoint: Endpoint,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(id: impl Into<BackendId>, endpoint: Endpoint, client: reqwest::Client) -> Self {
        Self {
            id: id.into(),
            endpoint,
            client,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.url.trim_end_matches('/'))
    }
}

/// Map a non-success HTTP status to a retry category.
pub fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let detail = format!("HTTP {status}: {}", body.chars().take(200).collect::<String>());
    match status {
        StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited(detail),
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => BackendError::Transient(detail),
        _ => BackendError::Fatal(detail),
    }
}

fn classify_transport(e: reqwest::Error) -> BackendError {
    if e.is_builder() {
        BackendError::Fatal(e.to_string())
    } else {
        BackendError::Transient(e.to_string())
    }
}

/// Pull `choices[0].message.content` out of a completion body.
pub fn completion_text(body: &serde_json::Value) -> Result<String, BackendError> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| BackendError::Fatal("response has no message content".into()))
}

#[async_trait]
impl Backend for HttpBackend {
    fn id(&self) -> &BackendId {
        &self.id
    }

    async fn execute(&self, prompt: &str, timeout: Duration) -> Result<String, BackendError> {
        let request_body = serde_json::json!({
            "model": self.endpoint.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.2
        });

        let mut request = self
            .client
            .post(self.completions_url())
            .timeout(timeout)
            .json(&request_body);
        if let Some(key) = &self.endpoint.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendError::Transient(format!("unreadable response body: {e}")))?;
        let text = completion_text(&body)?;
        debug!(backend = %self.id, chars = text.len(), "Completion received");
        Ok(text)
    }
}

/// One `HttpBackend` per configured endpoint, sharing a client.
pub fn build_pool(config: &AgentsConfig) -> Result<BackendPool, ClientError> {
    let client = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .build()?;

    Ok(config
        .endpoints
        .iter()
        .fold(BackendPool::new(), |pool, (id, endpoint)| {
            pool.with(HttpBackend::new(id.as_str(), endpoint.clone(), client.clone()))
        }))
}
