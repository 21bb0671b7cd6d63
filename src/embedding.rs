//! Embedding collaborator
//!
//! Narrow interface over the external embedding service. Blank input
//! short-circuits to a zero vector so callers never embed empty chunks.

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::errors::{AnalysisError, Result};

/// External embedding function: text in, fixed-dimension vector out
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimension of produced vectors
    fn dimension(&self) -> usize;
}

/// Embed many texts concurrently. Ordering of the returned vectors matches
/// the input; the calls themselves fan out.
pub async fn embed_batch(embedder: &dyn Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let futures = texts.iter().map(|t| embedder.embed(t));
    join_all(futures).await.into_iter().collect()
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// HTTP embedder against an Ollama-compatible `/api/embeddings` endpoint
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
    timeout: Duration,
}

impl OllamaEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
        timeout_secs: u64,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            dimension,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&json!({
                "model": self.model,
                "prompt": text,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout {
                        duration_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    AnalysisError::Embedding(format!("failed to reach embedding service: {}", e))
                }
            })?;

        if !response.status().is_success() {
            return Err(AnalysisError::Embedding(format!(
                "embedding service returned {}",
                response.status()
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Embedding(format!("invalid embedding response: {}", e)))?;
        Ok(body.embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
