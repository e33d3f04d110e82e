//! Embedding backends and vector utilities.
//!
//! [`Embedder`] is the seam between index construction and the embedding
//! service. Two HTTP backends are provided:
//! - **[`OpenAIEmbedder`]**: `POST {base}/embeddings`, authenticated with
//!   `OPENAI_API_KEY`.
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on a local Ollama.
//!
//! Both send texts in batches and retry transient failures with exponential
//! backoff (see [`crate::http`]). Tests inject their own [`Embedder`].
//!
//! Vectors are persisted as little-endian `f32` BLOBs via [`vec_to_blob`]
//! and [`blob_to_vec`].

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::{AssistantError, Result};
use crate::http::send_with_retry;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Turns text into vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, recorded with the persisted index.
    fn model_name(&self) -> &str;

    /// Embed `texts`, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AssistantError::external(anyhow!("empty embedding response")))
    }
}

/// Build the embedder named by `embedding.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Box::new(OllamaEmbedder::new(config)?)),
        other => Err(AssistantError::configuration(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AssistantError::configuration(format!("building HTTP client: {}", e)))
}

// ============ OpenAI ============

pub struct OpenAIEmbedder {
    client: reqwest::Client,
    model: String,
    base_url: String,
    /// Read once at construction; checked when a request is made so that
    /// commands which never embed (e.g. `stats`) work without a key.
    api_key: Option<String>,
    max_retries: u32,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model: config.model.clone(),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AssistantError::external(anyhow!("OPENAI_API_KEY is not set")))?;

        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({ "model": self.model, "input": texts });
        debug!(batch = texts.len(), model = %self.model, "requesting OpenAI embeddings");

        let response = send_with_retry("OpenAI embeddings", self.max_retries, || {
            self.client.post(&url).bearer_auth(api_key).json(&body)
        })
        .await
        .map_err(AssistantError::external)?;

        let json: serde_json::Value = response
            .json()
            .await
            .context("decoding OpenAI embeddings response")
            .map_err(AssistantError::external)?;
        let vectors = parse_openai_response(&json).map_err(AssistantError::external)?;
        check_count(texts.len(), vectors)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> anyhow::Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("invalid OpenAI response: missing embedding"))?;
        indexed.push((index, to_f32_vec(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    url: String,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let body = serde_json::json!({ "model": self.model, "input": texts });
        debug!(batch = texts.len(), model = %self.model, "requesting Ollama embeddings");

        let response = send_with_retry("Ollama embeddings", self.max_retries, || {
            self.client.post(&url).json(&body)
        })
        .await
        .with_context(|| format!("is Ollama running at {}?", self.url))
        .map_err(AssistantError::external)?;

        let json: serde_json::Value = response
            .json()
            .await
            .context("decoding Ollama embeddings response")
            .map_err(AssistantError::external)?;
        let vectors = parse_ollama_response(&json).map_err(AssistantError::external)?;
        check_count(texts.len(), vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> anyhow::Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(|embedding| -> anyhow::Result<Vec<f32>> {
            let values = embedding
                .as_array()
                .ok_or_else(|| anyhow!("invalid Ollama response: embedding is not an array"))?;
            to_f32_vec(values, "Ollama")
        })
        .collect()
}

fn to_f32_vec(values: &[serde_json::Value], provider: &str) -> anyhow::Result<Vec<f32>> {
    values
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                anyhow!("invalid {} response: non-numeric embedding value {}", provider, v)
            })
        })
        .collect()
}

fn check_count(expected: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(AssistantError::external(anyhow!(
            "expected {} embeddings, got {}",
            expected,
            vectors.len()
        )));
    }
    Ok(vectors)
}

// ============ Vector utilities ============

/// Encode a vector as little-endian `f32` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB written by [`vec_to_blob`]. Trailing partial values are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty, mismatched, or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (d + x * y, na + x * x, nb + y * y)
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip_preserves_values() {
        let v = vec![1.0f32, -2.5, 3.125, 0.0];
        let blob = vec_to_blob(&v);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_vec(&blob), v);
    }

    #[test]
    fn cosine_basics() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn openai_response_is_reordered_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn openai_response_without_data_is_an_error() {
        assert!(parse_openai_response(&serde_json::json!({"error": "x"})).is_err());
    }

    #[test]
    fn ollama_response_is_parsed() {
        let json = serde_json::json!({ "embeddings": [[0.5, 0.5], [1.0, 0.0]] });
        let vectors = parse_ollama_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], vec![0.5, 0.5]);
    }

    #[test]
    fn non_numeric_embedding_values_are_rejected() {
        let openai = serde_json::json!({
            "data": [{ "index": 0, "embedding": [0.1, "NaN", 0.3] }]
        });
        let err = parse_openai_response(&openai).unwrap_err();
        assert!(err.to_string().contains("non-numeric"));

        let ollama = serde_json::json!({ "embeddings": [[0.5, null]] });
        assert!(parse_ollama_response(&ollama).is_err());
    }

    #[test]
    fn count_mismatch_is_external_error() {
        let err = check_count(2, vec![vec![1.0]]).unwrap_err();
        assert!(matches!(err, AssistantError::ExternalService(_)));
    }

    #[test]
    fn unknown_provider_is_configuration_error() {
        let cfg = EmbeddingConfig {
            provider: "cohere".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            create_embedder(&cfg),
            Err(AssistantError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn openai_without_key_fails_before_any_request() {
        let embedder = OpenAIEmbedder {
            client: reqwest::Client::new(),
            model: "m".to_string(),
            base_url: OPENAI_BASE_URL.to_string(),
            api_key: None,
            max_retries: 0,
        };
        let err = embedder.embed(&["hi".to_string()]).await.unwrap_err();
        assert!(matches!(err, AssistantError::ExternalService(_)));
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
