use std::time::Duration;

use serde_json::json;

use crate::config::{Config, EMBEDDING_DIM, HTTP_TIMEOUT_SECS, OPENAI_API_URL, RATE_LIMIT_BACKOFF_SECS};
use crate::error::{AppError, Result};

/// Client for the embedding endpoint. One call maps one text to a
/// fixed-dimension vector; a wrong-dimension response is rejected rather
/// than poisoning the index.
pub struct Embedder {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl Embedder {
    pub fn new(cfg: &Config) -> Result<Self> {
        if cfg.openai_api_key.is_empty() {
            return Err(AppError::Config("OPENAI_API_KEY must be set".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_url: format!("{OPENAI_API_URL}/embeddings"),
            api_key: cfg.openai_api_key.clone(),
            model: cfg.embedding_model.clone(),
        })
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&json!({"model": self.model, "input": text}))
            .send()
            .await?;

        if resp.status().as_u16() == 429 {
            return Err(AppError::RateLimited(RATE_LIMIT_BACKOFF_SECS));
        }
        if !resp.status().is_success() {
            return Err(AppError::Embedding(format!(
                "embedding endpoint returned {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp.json().await?;
        let values = body
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|d| d.first())
            .and_then(|e| e.get("embedding"))
            .and_then(|e| e.as_array())
            .ok_or_else(|| AppError::Embedding("response missing embedding".to_string()))?;

        let vector: Vec<f32> = values
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| AppError::Embedding("non-numeric embedding element".to_string()))?;

        if vector.len() != EMBEDDING_DIM {
            return Err(AppError::Embedding(format!(
                "expected {EMBEDDING_DIM}-dim vector, got {}",
                vector.len()
            )));
        }
        Ok(vector)
    }
}
