use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use super::parser::parse_json_payload;
use super::{BackendError, InferenceBackend, OperationKind};

/// HTTP inference backend for a local or gateway-hosted model server.
///
/// Speaks a single-endpoint protocol: `POST {base_url}/api/infer` with the
/// operation kind and structured input, expecting a text `output` that
/// parses as JSON (Markdown fences tolerated).
pub struct HttpInferenceBackend {
    base_url: String,
    model: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpInferenceBackend {
    /// Create a backend pointing at the given server.
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        }
    }

    /// Default local inference server with a 5-minute timeout.
    pub fn default_local(model: &str) -> Self {
        Self::new("http://localhost:8130", model, 300)
    }
}

/// Request body for /api/infer
#[derive(Serialize)]
struct InferRequest<'a> {
    model: &'a str,
    operation: &'a str,
    input: &'a serde_json::Value,
    stream: bool,
}

/// Response body from /api/infer
#[derive(Deserialize)]
struct InferResponse {
    output: String,
}

impl InferenceBackend for HttpInferenceBackend {
    fn id(&self) -> &str {
        &self.model
    }

    fn request<'a>(
        &'a self,
        kind: OperationKind,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, BackendError>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{}/api/infer", self.base_url);
            let body = InferRequest {
                model: &self.model,
                operation: kind.as_str(),
                input: &input,
                stream: false,
            };

            let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
                if e.is_connect() {
                    BackendError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    BackendError::Timeout(self.timeout_secs)
                } else {
                    BackendError::HttpClient(e.to_string())
                }
            })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(BackendError::Api {
                    status: status.as_u16(),
                    body,
                });
            }

            let parsed: InferResponse = response.json().await.map_err(|e| {
                BackendError::MalformedResponse(format!("Invalid response envelope: {e}"))
            })?;

            parse_json_payload(&parsed.output)
        })
    }
}

/// Mock inference backend for testing — routes each request through a
/// caller-supplied handler so tests can script per-operation (and per-page)
/// behavior.
pub struct MockBackend {
    id: String,
    #[allow(clippy::type_complexity)]
    handler: Box<
        dyn Fn(OperationKind, &serde_json::Value) -> Result<serde_json::Value, BackendError>
            + Send
            + Sync,
    >,
}

impl MockBackend {
    pub fn new<F>(id: &str, handler: F) -> Self
    where
        F: Fn(OperationKind, &serde_json::Value) -> Result<serde_json::Value, BackendError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id: id.to_string(),
            handler: Box::new(handler),
        }
    }

    /// Same canned value for every request.
    pub fn canned(id: &str, value: serde_json::Value) -> Self {
        Self::new(id, move |_, _| Ok(value.clone()))
    }
}

impl InferenceBackend for MockBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn request<'a>(
        &'a self,
        kind: OperationKind,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, BackendError>> + Send + 'a>> {
        Box::pin(async move { (self.handler)(kind, &input) })
    }
}
