//! In-memory [`LexicalIndex`] and [`VectorIndex`] implementations.
//!
//! Both use `Vec`s behind `std::sync::RwLock`. Lexical search scores every
//! entry of the requested language with [`LexicalComponents::compute`];
//! vector search is brute-force cosine distance. Intended for tests and
//! small deployments.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{question_contains, IndexEntry, LexicalHit, LexicalIndex, VectorHit, VectorIndex, VectorPoint};
use crate::embedding::cosine_similarity;
use crate::error::{EmbeddingError, Result};
use crate::lexical::{LexicalComponents, LexicalWeights};
use crate::models::Language;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// In-memory lexical index.
#[derive(Default)]
pub struct InMemoryLexicalIndex {
    entries: RwLock<Vec<IndexEntry>>,
}

impl InMemoryLexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LexicalIndex for InMemoryLexicalIndex {
    async fn replace_owner(&self, owner_id: &str, entries: &[IndexEntry]) -> Result<()> {
        let mut stored = write(&self.entries);
        stored.retain(|e| e.owner_id != owner_id);
        stored.extend(entries.iter().cloned());
        Ok(())
    }

    async fn delete_owner(&self, owner_id: &str) -> Result<()> {
        write(&self.entries).retain(|e| e.owner_id != owner_id);
        Ok(())
    }

    async fn owner_entries(&self, owner_id: &str) -> Result<Vec<IndexEntry>> {
        Ok(read(&self.entries)
            .iter()
            .filter(|e| e.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn search(&self, query: &str, language: Language, limit: usize) -> Result<Vec<LexicalHit>> {
        let weights = LexicalWeights::default();
        let mut hits: Vec<LexicalHit> = read(&self.entries)
            .iter()
            .filter(|e| e.language == language)
            .filter_map(|e| {
                let components = LexicalComponents::compute(query, &e.question, &e.answer, language);
                (components.score(&weights) > 0.0).then(|| LexicalHit {
                    entry: e.clone(),
                    components,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.components
                .score(&weights)
                .partial_cmp(&a.components.score(&weights))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn curated_containing(&self, needle: &str, limit: usize) -> Result<Vec<IndexEntry>> {
        Ok(read(&self.entries)
            .iter()
            .filter(|e| question_contains(e, needle))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// In-memory brute-force vector index.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    points: RwLock<Vec<(String, VectorPoint)>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn dims(&self) -> Result<Option<usize>> {
        Ok(read(&self.points).first().map(|(_, p)| p.vector.len()))
    }

    async fn replace_owner(&self, owner_id: &str, points: &[VectorPoint]) -> Result<()> {
        let mut stored = write(&self.points);

        let expected = stored
            .iter()
            .find(|(owner, _)| owner != owner_id)
            .map(|(_, p)| p.vector.len())
            .or_else(|| points.first().map(|p| p.vector.len()));
        if let Some(expected) = expected {
            if let Some(bad) = points.iter().find(|p| p.vector.len() != expected) {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: bad.vector.len(),
                }
                .into());
            }
        }

        stored.retain(|(owner, _)| owner != owner_id);
        stored.extend(points.iter().map(|p| (owner_id.to_string(), p.clone())));
        Ok(())
    }

    async fn delete_owner(&self, owner_id: &str) -> Result<()> {
        write(&self.points).retain(|(owner, _)| owner != owner_id);
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize, language: Option<Language>) -> Result<Vec<VectorHit>> {
        let mut hits: Vec<VectorHit> = read(&self.points)
            .iter()
            .filter(|(_, p)| language.map(|l| p.payload.language == l).unwrap_or(true))
            .map(|(_, p)| VectorHit {
                point_id: p.id.clone(),
                payload: p.payload.clone(),
                distance: 1.0 - cosine_similarity(vector, &p.vector) as f64,
            })
            .collect();

        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use crate::models::SourceType;

    fn entry(owner: &str, id: &str, lang: Language, question: &str) -> IndexEntry {
        IndexEntry {
            item_id: id.into(),
            owner_id: owner.into(),
            language: lang,
            source_type: SourceType::Curated,
            question: question.into(),
            answer: "answer text".into(),
            title: question.into(),
            category: None,
            is_current: true,
            section: None,
        }
    }

    #[tokio::test]
    async fn test_lexical_language_scoped() {
        let idx = InMemoryLexicalIndex::new();
        idx.replace_owner("o1", &[entry("o1", "1", Language::En, "dormitory rooms")])
            .await
            .unwrap();
        idx.replace_owner("o2", &[entry("o2", "2", Language::Uz, "yotoqxona")])
            .await
            .unwrap();
        let hits = idx.search("dormitory", Language::En, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.item_id, "1");
        assert!(idx.search("dormitory", Language::Ru, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lexical_replace_owner() {
        let idx = InMemoryLexicalIndex::new();
        idx.replace_owner("o1", &[entry("o1", "1", Language::En, "a"), entry("o1", "1b", Language::En, "b")])
            .await
            .unwrap();
        idx.replace_owner("o1", &[entry("o1", "1", Language::En, "a")]).await.unwrap();
        assert_eq!(idx.len(), 1);
    }

    #[tokio::test]
    async fn test_vector_nearest_and_filter() {
        let idx = InMemoryVectorIndex::new();
        let p = |id: &str, lang, v: Vec<f32>| VectorPoint {
            id: id.into(),
            vector: v,
            payload: entry("o", id, lang, "q"),
        };
        idx.replace_owner(
            "o",
            &[p("a", Language::En, vec![1.0, 0.0]), p("b", Language::Uz, vec![0.0, 1.0])],
        )
        .await
        .unwrap();
        let hits = idx.search(&[1.0, 0.1], 10, None).await.unwrap();
        assert_eq!(hits[0].point_id, "a");
        assert!(hits[0].distance < hits[1].distance);
        let hits = idx.search(&[1.0, 0.1], 10, Some(Language::Uz)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].point_id, "b");
    }

    #[tokio::test]
    async fn test_vector_dimension_mismatch() {
        let idx = InMemoryVectorIndex::new();
        let p = |owner: &str, v: Vec<f32>| VectorPoint {
            id: owner.into(),
            vector: v,
            payload: entry(owner, owner, Language::En, "q"),
        };
        idx.replace_owner("a", &[p("a", vec![1.0, 0.0])]).await.unwrap();
        let err = idx.replace_owner("b", &[p("b", vec![1.0, 0.0, 0.0])]).await.unwrap_err();
        assert!(matches!(err, RagError::Embedding(EmbeddingError::DimensionMismatch { .. })));
        assert_eq!(idx.dims().await.unwrap(), Some(2));
    }
}
