// ── Embedding Client ───────────────────────────────────────────────────────
//
// The dense-signal adapter: text in, vector out. Failure here is terminal
// for encode and retrieve — there is no degraded substitute for the
// semantic signal, so errors surface as `EmbeddingUnavailable` rather than
// falling back.
//
// The HTTP client speaks both wire formats in the wild:
//   1. Ollama `/api/embed` (0.4+), then legacy `/api/embeddings`
//   2. OpenAI-compatible `/v1/embeddings`
// and normalises whichever answer arrives.

use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::atoms::error::{MemoryError, MemoryResult};
use crate::atoms::types::EmbedderConfig;

/// Produces a vector for a text. Implementations must be deterministic for
/// unchanged input — the encode cache keys on content hash and assumes
/// re-embedding identical text yields an identical vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>>;

    /// Identifier of the embedding model, for logs and diagnostics.
    fn model_name(&self) -> &str;
}

/// HTTP embedder for Ollama and OpenAI-compatible services.
pub struct HttpEmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbedderConfig) -> Self {
        HttpEmbeddingClient {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Ollama current API: POST /api/embed { model, input } → { embeddings: [[f32…]] }.
    /// Some versions answer with a singular `embedding` even on this route.
    async fn embed_ollama(&self, text: &str) -> MemoryResult<Vec<f32>> {
        let url = format!("{}/api/embed", self.base_url);
        let body = json!({ "model": self.model, "input": text });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify("embed", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            // Try the legacy endpoint before giving up.
            debug!("[embed] /api/embed returned {} — trying legacy endpoint", status);
            return self.embed_ollama_legacy(text).await;
        }

        let v: Value = resp.json().await.map_err(|e| self.classify("embed", e))?;
        if let Some(first) = v["embeddings"].as_array().and_then(|a| a.first()).and_then(|e| e.as_array()) {
            let vec = json_floats(first);
            if !vec.is_empty() {
                return Ok(vec);
            }
        }
        if let Some(embedding) = v["embedding"].as_array() {
            let vec = json_floats(embedding);
            if !vec.is_empty() {
                return Ok(vec);
            }
        }
        Err(MemoryError::EmbeddingUnavailable(format!(
            "no embedding array in response from {} (model {})",
            url, self.model
        )))
    }

    /// Legacy Ollama: POST /api/embeddings { model, prompt } → { embedding: [f32…] }.
    async fn embed_ollama_legacy(&self, text: &str) -> MemoryResult<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = json!({ "model": self.model, "prompt": text });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify("embed", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(MemoryError::EmbeddingUnavailable(format!(
                "embedding service {} — {}",
                status,
                truncate(&text, 200)
            )));
        }

        let v: Value = resp.json().await.map_err(|e| self.classify("embed", e))?;
        let vec = v["embedding"].as_array().map(|a| json_floats(a)).unwrap_or_default();
        if vec.is_empty() {
            return Err(MemoryError::EmbeddingUnavailable("empty embedding vector".into()));
        }
        Ok(vec)
    }

    /// OpenAI-compatible format: POST /v1/embeddings { model, input }.
    async fn embed_openai(&self, text: &str) -> MemoryResult<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({ "model": self.model, "input": text });

        let mut req = self.client.post(&url).json(&body).timeout(self.timeout);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.map_err(|e| self.classify("embed", e))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(MemoryError::EmbeddingUnavailable(format!(
                "embedding service {} — {}",
                status,
                truncate(&text, 200)
            )));
        }

        let v: Value = resp.json().await.map_err(|e| self.classify("embed", e))?;
        let vec = v["data"][0]["embedding"].as_array().map(|a| json_floats(a)).unwrap_or_default();
        if vec.is_empty() {
            return Err(MemoryError::EmbeddingUnavailable("empty embedding vector".into()));
        }
        Ok(vec)
    }

    fn classify(&self, operation: &str, e: reqwest::Error) -> MemoryError {
        if e.is_timeout() {
            MemoryError::timeout(operation, self.timeout.as_millis() as u64)
        } else {
            MemoryError::EmbeddingUnavailable(format!(
                "service unreachable at {}: {}",
                self.base_url, e
            ))
        }
    }

    /// Round-trip a tiny request; returns the vector dimension on success.
    pub async fn probe(&self) -> MemoryResult<usize> {
        let vec = self.embed("connection probe").await?;
        info!("[embed] Probe succeeded, model {} dim {}", self.model, vec.len());
        Ok(vec.len())
    }
}

#[async_trait]
impl Embedder for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>> {
        // Ollama first, then OpenAI format. Timeouts propagate as-is so
        // callers can retry; everything else collapses into one
        // EmbeddingUnavailable naming both attempts.
        let ollama_err = match self.embed_ollama(text).await {
            Ok(vec) => return Ok(vec),
            Err(e @ MemoryError::Timeout { .. }) => return Err(e),
            Err(e) => e,
        };
        match self.embed_openai(text).await {
            Ok(vec) => Ok(vec),
            Err(e @ MemoryError::Timeout { .. }) => Err(e),
            Err(openai_err) => Err(MemoryError::EmbeddingUnavailable(format!(
                "ollama: {} | openai: {}",
                ollama_err, openai_err
            ))),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn json_floats(values: &[Value]) -> Vec<f32> {
    values.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect()
}

fn truncate(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
