//! Generation collaborator
//!
//! The pipeline treats text generation as an opaque function
//! `generate(prompt) -> text`. The HTTP implementation targets an
//! Ollama-compatible endpoint; stages never see transport details, only a
//! `Generation` or `Timeout` error they catch locally.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::errors::{AnalysisError, Result};

/// External text-generation function used by every pipeline stage
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// HTTP generator against an Ollama-compatible `/api/generate` endpoint
pub struct OllamaGenerator {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaGenerator {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout {
                        duration_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    AnalysisError::Generation(format!("failed to reach generation service: {}", e))
                }
            })?;

        if !response.status().is_success() {
            return Err(AnalysisError::Generation(format!(
                "generation service returned {}",
                response.status()
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Generation(format!("invalid generation response: {}", e)))?;
        Ok(body.response)
    }
}

/// Strip optional fenced-code-block delimiters from a model response.
///
/// Models regularly wrap JSON in ```` ```json ... ``` ```` despite being told
/// not to; the consumer removes the fences before parsing.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Drop the info string (e.g. "json") up to the first newline
        text = match rest.find('\n') {
            Some(pos) => &rest[pos + 1..],
            None => rest,
        };
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}
