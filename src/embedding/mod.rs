//! Embedding providers.
//!
//! The engine talks to embeddings through the [`Embedder`] trait: a batch
//! `embed` call that preserves input order and returns vectors of a fixed
//! dimensionality. The remote provider wraps an HTTP endpoint with retry
//! and backoff; the local provider is a deterministic feature hasher used
//! when no endpoint is configured and in tests.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::{EmbeddingConfig, RequestConfig};
use crate::error::{EmbeddingError, EmbeddingResult};

/// Maximum texts per upstream request.
const BATCH_SIZE: usize = 64;

/// Batch text embedding.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, preserving input order.
    async fn embed(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Fixed output dimensionality.
    fn dim(&self) -> usize;
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedItem>,
}

#[derive(Debug, Deserialize)]
struct EmbedItem {
    embedding: Vec<f32>,
}

/// Client for a remote batch-embedding endpoint.
#[derive(Clone)]
pub struct RemoteEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dim: usize,
    request_config: RequestConfig,
}

impl RemoteEmbedder {
    /// Create a new remote embedder.
    pub fn new(config: &EmbeddingConfig, request_config: RequestConfig) -> EmbeddingResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(|e| EmbeddingError::Permanent {
                status: 0,
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dim: config.dim,
            request_config,
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    model = %self.model,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying embedding request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();
            match self.execute_batch(&url, batch).await {
                Ok(vectors) => {
                    debug!(
                        model = %self.model,
                        texts = batch.len(),
                        latency_ms = start.elapsed().as_millis(),
                        "Embedding batch succeeded"
                    );
                    return Ok(vectors);
                }
                Err(e) if e.is_transient() => {
                    warn!(model = %self.model, error = %e, retry = retries, "Embedding batch failed");
                    last_error = Some(e);
                    retries += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Err(EmbeddingError::Transient {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    async fn execute_batch(&self, url: &str, batch: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input: batch,
        };

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    EmbeddingError::Transient {
                        message: e.to_string(),
                        retries: 0,
                    }
                } else {
                    EmbeddingError::Permanent {
                        status: 0,
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(EmbeddingError::Transient {
                    message: format!("{} - {}", status, body),
                    retries: 0,
                });
            }
            return Err(EmbeddingError::Permanent {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: EmbedResponse =
            response
                .json()
                .await
                .map_err(|e| EmbeddingError::Permanent {
                    status: 0,
                    message: format!("failed to parse embedding response: {}", e),
                })?;

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|item| item.embedding).collect();
        for vector in &vectors {
            if vector.len() != self.dim {
                return Err(EmbeddingError::Dimension {
                    expected: self.dim,
                    actual: vector.len(),
                });
            }
        }
        if vectors.len() != batch.len() {
            return Err(EmbeddingError::Permanent {
                status: 0,
                message: format!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                ),
            });
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH_SIZE) {
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// Deterministic local embedder using hashed token and character-trigram
/// features, L2-normalized. Not a semantic model; it gives the engine a
/// dependable offline path with stable cosine geometry.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    /// Create a hash embedder with the given dimensionality.
    pub fn new(dim: usize) -> Self {
        info!(dim, "Using local deterministic embedder");
        Self { dim }
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let mut hasher = Sha256::new();
        hasher.update(feature.as_bytes());
        let digest = hasher.finalize();
        let idx = u64::from_le_bytes(digest[0..8].try_into().expect("sha256 digest is 32 bytes"))
            as usize
            % self.dim;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (idx, sign)
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        let lower = text.to_lowercase();

        for token in lower.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let (idx, sign) = self.bucket(token);
            vector[idx] += sign;

            let chars: Vec<char> = token.chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                let (idx, sign) = self.bucket(&trigram);
                vector[idx] += 0.5 * sign;
            }
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(64);
        let texts = vec!["AI governance framework".to_string()];
        let a = embedder.embed(&texts).await.unwrap();
        let b = embedder.embed(&texts).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[tokio::test]
    async fn test_hash_embedder_preserves_order() {
        let embedder = HashEmbedder::new(32);
        let texts = vec!["first text".to_string(), "second text".to_string()];
        let vectors = embedder.embed(&texts).await.unwrap();
        assert_eq!(vectors.len(), 2);
        let single = embedder.embed(&texts[1..2].to_vec()).await.unwrap();
        assert_eq!(vectors[1], single[0]);
    }

    #[tokio::test]
    async fn test_hash_embedder_overlap_raises_similarity() {
        let embedder = HashEmbedder::new(128);
        let texts = vec![
            "AI regulation".to_string(),
            "AI governance framework".to_string(),
            "biodiversity restoration".to_string(),
        ];
        let v = embedder.embed(&texts).await.unwrap();
        let cos = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        let related = cos(&v[0], &v[1]);
        let unrelated = cos(&v[0], &v[2]);
        assert!(related > unrelated, "{} <= {}", related, unrelated);
    }

    #[tokio::test]
    async fn test_hash_embedder_empty_text() {
        let embedder = HashEmbedder::new(16);
        let vectors = embedder.embed(&vec!["".to_string()]).await.unwrap();
        assert_eq!(vectors[0], vec![0.0; 16]);
    }

    #[test]
    fn test_remote_embedder_creation() {
        let config = EmbeddingConfig {
            model: "test-embed".to_string(),
            dim: 384,
            base_url: "https://embeddings.example.com/".to_string(),
            api_key: "key".to_string(),
        };
        let embedder = RemoteEmbedder::new(&config, RequestConfig::default()).unwrap();
        assert_eq!(embedder.dim(), 384);
        assert_eq!(embedder.base_url, "https://embeddings.example.com");
    }
}
