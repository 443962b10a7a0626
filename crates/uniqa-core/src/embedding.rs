//! Embedding provider trait, primary/fallback embedder, and vector helpers.
//!
//! Concrete providers (Ollama, OpenAI, fastembed) live in the `uniqa` app
//! crate. The core only sees [`EmbeddingProvider`].
//!
//! Providers that support asymmetric instructions embed indexed text with
//! [`EmbedPurpose::Document`] and queries with [`EmbedPurpose::Query`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EmbeddingError;

/// Which side of retrieval a text is embedded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedPurpose {
    Document,
    Query,
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `768`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in order.
    async fn embed(&self, texts: &[String], purpose: EmbedPurpose) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Vectors plus the model that produced them.
#[derive(Debug, Clone)]
pub struct Embedded {
    pub vectors: Vec<Vec<f32>>,
    pub model: String,
}

/// A primary provider with one alternate scheme.
///
/// A provider failure or a dimension mismatch against the target index
/// triggers exactly one attempt with the fallback. There are no retries.
#[derive(Clone)]
pub struct Embedder {
    primary: Arc<dyn EmbeddingProvider>,
    fallback: Option<Arc<dyn EmbeddingProvider>>,
}

impl Embedder {
    pub fn new(primary: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn EmbeddingProvider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn model_name(&self) -> &str {
        self.primary.model_name()
    }

    pub fn dims(&self) -> usize {
        self.primary.dims()
    }

    /// Embed `texts`, checking every vector against `expected_dims`
    /// (the index dimension when known, otherwise the primary's).
    pub async fn embed(
        &self,
        texts: &[String],
        purpose: EmbedPurpose,
        expected_dims: Option<usize>,
    ) -> Result<Embedded, EmbeddingError> {
        let first = attempt(self.primary.as_ref(), texts, purpose, expected_dims).await;
        let err = match first {
            Ok(e) => return Ok(e),
            Err(err) => err,
        };

        let Some(fallback) = &self.fallback else {
            return Err(err);
        };

        tracing::warn!(
            primary = self.primary.model_name(),
            fallback = fallback.model_name(),
            "primary embedding failed, trying fallback: {err}"
        );
        attempt(fallback.as_ref(), texts, purpose, expected_dims).await
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, query: &str, expected_dims: Option<usize>) -> Result<Vec<f32>, EmbeddingError> {
        let embedded = self
            .embed(&[query.to_string()], EmbedPurpose::Query, expected_dims)
            .await?;
        embedded
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Provider("provider returned no vector".into()))
    }
}

async fn attempt(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    purpose: EmbedPurpose,
    expected_dims: Option<usize>,
) -> Result<Embedded, EmbeddingError> {
    let vectors = provider.embed(texts, purpose).await?;
    if vectors.len() != texts.len() {
        return Err(EmbeddingError::Provider(format!(
            "{} returned {} vectors for {} texts",
            provider.model_name(),
            vectors.len(),
            texts.len()
        )));
    }
    let expected = expected_dims.unwrap_or_else(|| provider.dims());
    if let Some(v) = vectors.iter().find(|v| v.len() != expected) {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: v.len(),
        });
    }
    Ok(Embedded {
        vectors,
        model: provider.model_name().to_string(),
    })
}

/// Scale a vector to unit length in place. Zero vectors are left alone.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
