//! Gateway client with retry, backoff, fan-out, and cancellation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Message, ModelRequest, ModelResponse, QueryParams};
use crate::config::{GatewayConfig, RequestConfig};
use crate::error::{ModelError, ModelResult};

/// One raw completion attempt against the upstream gateway. The client
/// wraps this with retries, timeouts, and cancellation; test doubles
/// implement it with scripted responses.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Perform a single completion attempt.
    async fn complete(&self, request: &ModelRequest) -> ModelResult<ModelResponse>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// HTTP backend against the model gateway's chat-completions endpoint.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpBackend {
    /// Create an HTTP backend from gateway configuration.
    pub fn new(config: &GatewayConfig) -> ModelResult<Self> {
        // Per-request timeouts are applied by the caller; the client-level
        // timeout is only a safety net.
        let client = Client::builder()
            .build()
            .map_err(|e| ModelError::InvalidResponse {
                model: String::new(),
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ModelBackend for HttpBackend {
    async fn complete(&self, request: &ModelRequest) -> ModelResult<ModelResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.params.temperature,
            max_tokens: request.params.max_tokens,
        };

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout {
                        model: request.model.clone(),
                        timeout_ms: request.params.timeout_ms,
                    }
                } else if e.is_connect() {
                    ModelError::Transient {
                        model: request.model.clone(),
                        message: e.to_string(),
                        retries: 0,
                    }
                } else {
                    ModelError::InvalidResponse {
                        model: request.model.clone(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(ModelError::Transient {
                    model: request.model.clone(),
                    message: format!("{} - {}", status, message),
                    retries: 0,
                });
            }
            return Err(ModelError::Permanent {
                model: request.model.clone(),
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| ModelError::InvalidResponse {
                    model: request.model.clone(),
                    message: format!("failed to parse completion: {}", e),
                })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ModelError::InvalidResponse {
                model: request.model.clone(),
                message: "no choices in completion".to_string(),
            })?;

        Ok(ModelResponse {
            model: request.model.clone(),
            content,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Gateway client: uniform async request/response with retries, backoff
/// with jitter, per-call timeouts, parallel fan-out, and cancellation.
#[derive(Clone)]
pub struct GatewayClient {
    backend: Arc<dyn ModelBackend>,
    request_config: RequestConfig,
}

impl GatewayClient {
    /// Create a client over a backend.
    pub fn new(backend: Arc<dyn ModelBackend>, request_config: RequestConfig) -> Self {
        Self {
            backend,
            request_config,
        }
    }

    /// Create a client over the HTTP gateway backend.
    pub fn http(config: &GatewayConfig, request_config: RequestConfig) -> ModelResult<Self> {
        Ok(Self::new(Arc::new(HttpBackend::new(config)?), request_config))
    }

    /// Query one model. Transient failures (timeout, 5xx, rate-limit) are
    /// retried up to the configured budget with exponential backoff and
    /// jitter; permanent failures surface immediately. Cancelling the
    /// token drains pending retries and returns [`ModelError::Cancelled`].
    pub async fn query(
        &self,
        model: &str,
        messages: Vec<Message>,
        params: QueryParams,
        cancel: &CancellationToken,
    ) -> ModelResult<ModelResponse> {
        let request = ModelRequest {
            model: model.to_string(),
            messages,
            params,
        };

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if cancel.is_cancelled() {
                return Err(ModelError::Cancelled {
                    model: model.to_string(),
                });
            }
            if retries > 0 {
                let base = self.request_config.retry_delay_ms * (2_u64.pow(retries - 1));
                let jitter = rand::thread_rng().gen_range(0..=base / 2);
                let delay = Duration::from_millis(base + jitter);
                warn!(
                    model = %model,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying model call"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(ModelError::Cancelled { model: model.to_string() });
                    }
                }
            }

            let start = Instant::now();
            let attempt = tokio::time::timeout(
                Duration::from_millis(request.params.timeout_ms),
                self.backend.complete(&request),
            );

            let outcome = tokio::select! {
                result = attempt => result,
                _ = cancel.cancelled() => {
                    // The in-flight call is dropped; its result would be
                    // discarded anyway.
                    return Err(ModelError::Cancelled { model: model.to_string() });
                }
            };

            match outcome {
                Ok(Ok(response)) => {
                    info!(
                        model = %model,
                        latency_ms = start.elapsed().as_millis(),
                        "Model call succeeded"
                    );
                    return Ok(response);
                }
                Ok(Err(e)) if e.is_transient() => {
                    error!(model = %model, error = %e, retry = retries, "Model call failed");
                    last_error = Some(e);
                    retries += 1;
                }
                Ok(Err(e)) => {
                    error!(model = %model, error = %e, "Model call failed permanently");
                    return Err(e);
                }
                Err(_) => {
                    let e = ModelError::Timeout {
                        model: model.to_string(),
                        timeout_ms: request.params.timeout_ms,
                    };
                    error!(model = %model, error = %e, retry = retries, "Model call timed out");
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(ModelError::Transient {
            model: model.to_string(),
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    /// Fan out the same messages to several models in parallel. Partial
    /// results are returned per model; this never raises. All spawned
    /// calls share the caller's cancellation token.
    pub async fn query_parallel(
        &self,
        models: &[String],
        messages: Vec<Message>,
        params: QueryParams,
        cancel: &CancellationToken,
    ) -> HashMap<String, ModelResult<ModelResponse>> {
        let mut set = JoinSet::new();
        for model in models {
            let client = self.clone();
            let model = model.clone();
            let messages = messages.clone();
            let params = params.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let result = client.query(&model, messages, params, &cancel).await;
                (model, result)
            });
        }

        let mut results = HashMap::with_capacity(models.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((model, result)) => {
                    results.insert(model, result);
                }
                Err(e) => {
                    debug!(error = %e, "Fan-out task panicked or was aborted");
                }
            }
        }
        results
    }
}
