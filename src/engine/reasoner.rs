// ── Reasoner Client ────────────────────────────────────────────────────────
//
// The reasoning-model adapter: prompt in, text out. Unlike the embedder,
// reasoner failures are never terminal — the reflector downgrades to zero
// writes and the compressor to deterministic truncation, so this client
// only has to classify errors honestly (Timeout vs Unavailable) and keep
// raw response bodies out of error messages.
//
// Wire format: OpenAI-compatible POST /chat/completions, non-streaming.
// One retry on transport errors; HTTP-level errors are not retried here
// (the callers' fallbacks are cheaper than a second model call).

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::atoms::error::{MemoryError, MemoryResult};
use crate::atoms::types::ReasonerConfig;

/// A text-completion capability: render a prompt, await the model's answer.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn complete(&self, prompt: &str) -> MemoryResult<String>;

    fn model_name(&self) -> &str;
}

/// HTTP reasoner for OpenAI-compatible chat-completion services.
pub struct HttpReasonerClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f64>,
    timeout: Duration,
}

impl HttpReasonerClient {
    pub fn new(config: &ReasonerConfig) -> Self {
        HttpReasonerClient {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    async fn request_once(&self, prompt: &str) -> MemoryResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": false,
        });
        if let Some(temp) = self.temperature {
            body["temperature"] = json!(temp);
        }

        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .timeout(self.timeout);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.map_err(|e| self.classify(e))?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(MemoryError::unavailable(
                "reasoner",
                format!("{} from {} (model {})", status, url, self.model),
            ));
        }

        let v: Value = resp.json().await.map_err(|e| self.classify(e))?;
        let content = v["choices"][0]["message"]["content"].as_str().unwrap_or_default();
        if content.is_empty() {
            return Err(MemoryError::unavailable("reasoner", "empty completion"));
        }
        debug!("[reasoner] {} returned {} chars", self.model, content.len());
        Ok(content.to_string())
    }

    fn classify(&self, e: reqwest::Error) -> MemoryError {
        if e.is_timeout() {
            MemoryError::timeout("reason", self.timeout.as_millis() as u64)
        } else {
            MemoryError::unavailable("reasoner", e.to_string())
        }
    }
}

#[async_trait]
impl Reasoner for HttpReasonerClient {
    async fn complete(&self, prompt: &str) -> MemoryResult<String> {
        match self.request_once(prompt).await {
            Ok(text) => Ok(text),
            // One retry on transport-level failures; a second timeout or an
            // HTTP error goes straight back to the caller's fallback path.
            Err(MemoryError::Unavailable { backend, message }) if backend == "reasoner" => {
                warn!("[reasoner] Transport failure, retrying once: {}", message);
                self.request_once(prompt).await
            }
            Err(e) => Err(e),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let client = HttpReasonerClient::new(&ReasonerConfig {
            base_url: "http://127.0.0.1:1/v1".into(),
            model: "test".into(),
            api_key: None,
            temperature: None,
            timeout_ms: 2_000,
        });
        let err = client.complete("hello").await.unwrap_err();
        assert!(err.is_retriable(), "got: {:?}", err);
    }
}
