//! Embedding provider implementations.
//!
//! Concrete backends for [`uniqa_core::embedding::EmbeddingProvider`]:
//! - **[`OllamaProvider`]**: `POST /api/embed` on a local Ollama instance.
//!   Nomic models get the asymmetric `search_document:` / `search_query:`
//!   instructions.
//! - **[`OpenAIProvider`]**: `POST /v1/embeddings`, key from `OPENAI_API_KEY`.
//! - **`LocalProvider`**: fastembed, behind the `local-embeddings-fastembed`
//!   feature. No network calls after the model download.
//!
//! Every provider L2-normalizes its output. Failures are returned as-is:
//! there is no retry loop, the [`Embedder`] fallback scheme is the only
//! second attempt.
//!
//! # Provider Selection
//!
//! [`create_embedder`] builds the primary provider and the optional
//! `[embedding.fallback]` one from configuration. `provider = "disabled"`
//! yields `None`, which turns the vector half of the dual index off.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use uniqa_core::embedding::{l2_normalize, EmbedPurpose, Embedder, EmbeddingProvider};
use uniqa_core::error::EmbeddingError;

use crate::config::EmbeddingConfig;

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn required_model(config: &EmbeddingConfig, provider: &str) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {} provider", provider))?;
    Ok((model, dims))
}

fn normalized(mut vectors: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
    for v in vectors.iter_mut() {
        l2_normalize(v);
    }
    vectors
}

fn parse_vectors(items: &[serde_json::Value], what: &str) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    items
        .iter()
        .map(|item| {
            item.as_array()
                .map(|arr| arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
                .ok_or_else(|| EmbeddingError::Provider(format!("Invalid {what} response: embedding is not an array")))
        })
        .collect()
}

async fn post_json(
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
    service: &str,
) -> Result<serde_json::Value, EmbeddingError> {
    let response = request
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| EmbeddingError::Provider(format!("{service} connection error: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(EmbeddingError::Provider(format!(
            "{service} API error {status}: {body_text}"
        )));
    }
    response
        .json()
        .await
        .map_err(|e| EmbeddingError::Provider(format!("{service} returned invalid JSON: {e}")))
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default:
/// `http://localhost:11434`). Requires an embedding model pulled into
/// Ollama (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model(config, "Ollama")?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            client: http_client(config.timeout_secs)?,
        })
    }

    /// Task instruction prefix for models trained with one.
    fn instruction(&self, purpose: EmbedPurpose) -> &'static str {
        if !self.model.contains("nomic") {
            return "";
        }
        match purpose {
            EmbedPurpose::Document => "search_document: ",
            EmbedPurpose::Query => "search_query: ",
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String], purpose: EmbedPurpose) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let prefix = self.instruction(purpose);
        let input: Vec<String> = texts.iter().map(|t| format!("{prefix}{t}")).collect();
        let body = serde_json::json!({
            "model": self.model,
            "input": input,
        });

        let json = post_json(
            self.client.post(format!("{}/api/embed", self.url)),
            &body,
            "Ollama",
        )
        .await?;

        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbeddingError::Provider("Invalid Ollama response: missing embeddings array".into()))?;
        Ok(normalized(parse_vectors(embeddings, "Ollama")?))
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls the `POST /v1/embeddings` endpoint with the configured model.
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model(config, "OpenAI")?;
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) => key,
            Err(_) => bail!("OPENAI_API_KEY environment variable not set"),
        };
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String], _purpose: EmbedPurpose) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json(
            self.client
                .post(format!("{}/embeddings", self.url))
                .header("Authorization", format!("Bearer {}", self.api_key)),
            &body,
            "OpenAI",
        )
        .await?;
        parse_openai_response(&json).map(normalized)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbeddingError::Provider("Invalid OpenAI response: missing data array".into()))?;

    let mut indexed: Vec<(u64, serde_json::Value)> = data
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let index = item.get("index").and_then(|v| v.as_u64()).unwrap_or(i as u64);
            let embedding = item.get("embedding").cloned().unwrap_or(serde_json::Value::Null);
            (index, embedding)
        })
        .collect();
    indexed.sort_by_key(|(i, _)| *i);

    let items: Vec<serde_json::Value> = indexed.into_iter().map(|(_, e)| e).collect();
    parse_vectors(&items, "OpenAI")
}

// ============ Local Provider (fastembed) ============

/// Embedding provider for local inference via fastembed.
///
/// The model is downloaded from Hugging Face on first use, cached, and kept
/// loaded for the lifetime of the provider.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "multilingual-e5-small".to_string());
        config_to_fastembed_model(&model_name)?;
        let dims = config.dims.unwrap_or(match model_name.as_str() {
            "multilingual-e5-base" | "nomic-embed-text-v1.5" | "bge-base-en-v1.5" => 768,
            "multilingual-e5-large" => 1024,
            _ => 384,
        });
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String], _purpose: EmbedPurpose) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let texts = texts.to_vec();
        let name = self.model_name.clone();
        let batch_size = self.batch_size;
        let slot = self.model.clone();

        let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
            if guard.is_none() {
                let kind = config_to_fastembed_model(&name).map_err(|e| EmbeddingError::Provider(e.to_string()))?;
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(kind).with_show_download_progress(false),
                )
                .map_err(|e| EmbeddingError::Provider(format!("Failed to initialize local embedding model: {e}")))?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| EmbeddingError::Provider("local model not loaded".into()))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| EmbeddingError::Provider(format!("Local embedding failed: {e}")))
        })
        .await
        .map_err(|e| EmbeddingError::Provider(format!("local embedding task failed: {e}")))??;

        Ok(normalized(vectors))
    }
}

/// Create the provider named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"local"` | `LocalProvider` (requires `local-embeddings-fastembed`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Primary provider plus the optional fallback, or `None` when disabled.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<Embedder>> {
    if !config.is_enabled() {
        return Ok(None);
    }
    let mut embedder = Embedder::new(create_provider(config)?);
    if let Some(fallback) = config.fallback.as_deref().filter(|f| f.is_enabled()) {
        embedder = embedder.with_fallback(create_provider(fallback)?);
    }
    tracing::info!(
        model = embedder.model_name(),
        dims = embedder.dims(),
        "embedding provider ready"
    );
    Ok(Some(embedder))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ollama(model: &str) -> OllamaProvider {
        OllamaProvider::new(&EmbeddingConfig {
            provider: "ollama".into(),
            model: Some(model.into()),
            dims: Some(768),
            ..EmbeddingConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_disabled_yields_no_embedder() {
        assert!(create_embedder(&EmbeddingConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_nomic_instructions() {
        let p = ollama("nomic-embed-text");
        assert_eq!(p.instruction(EmbedPurpose::Document), "search_document: ");
        assert_eq!(p.instruction(EmbedPurpose::Query), "search_query: ");
        assert_eq!(ollama("mxbai-embed-large").instruction(EmbedPurpose::Query), "");
    }

    #[test]
    fn test_ollama_requires_model() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            dims: Some(768),
            ..EmbeddingConfig::default()
        };
        assert!(OllamaProvider::new(&config).is_err());
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_openai_missing_data() {
        let err = parse_openai_response(&serde_json::json!({"error": "x"})).unwrap_err();
        assert!(matches!(err, EmbeddingError::Provider(_)));
    }

    #[test]
    fn test_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "magic".into(),
            ..EmbeddingConfig::default()
        };
        assert!(create_provider(&config).is_err());
    }
}
