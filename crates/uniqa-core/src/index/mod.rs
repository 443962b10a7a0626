//! Dual lexical + vector index.
//!
//! Every indexed item (a document [`Segment`] or one language of a
//! [`CuratedAnswer`]) is stored twice: as an [`IndexEntry`] in a
//! [`LexicalIndex`] and as a [`VectorPoint`] in a [`VectorIndex`]. Both are
//! scoped by an owner id (`document:<id>` or `curated:<id>`), and
//! [`DualIndex::index_upsert`] replaces everything an owner had in both
//! indexes. There is no partial merge.
//!
//! Backends are pluggable: [`memory`] ships in-process reference
//! implementations, the `uniqa` app crate provides SQLite-backed ones.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::{EmbedPurpose, Embedder};
use crate::error::{RagError, Result};
use crate::lexical::LexicalComponents;
use crate::models::{CuratedAnswer, Language, Segment, SourceType};

/// Searchable record shared by both indexes (vector points carry it as payload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Curated answer id or segment id.
    pub item_id: String,
    pub owner_id: String,
    pub language: Language,
    pub source_type: SourceType,
    /// Question plus variants for curated answers, section title for segments.
    pub question: String,
    /// Answer text for curated answers, segment text for segments.
    pub answer: String,
    pub title: String,
    pub category: Option<String>,
    pub is_current: bool,
    pub section: Option<String>,
}

/// One lexical match with its raw component scores.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub entry: IndexEntry,
    pub components: LexicalComponents,
}

/// One stored embedding.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    /// `doc_<id>_chunk_<n>` for segments, `faq_<id>_<lang>` for curated answers.
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: IndexEntry,
}

/// One vector match. `distance` is cosine distance (`1 - cosine`).
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub point_id: String,
    pub payload: IndexEntry,
    pub distance: f64,
}

/// Full-text index with per-language ranking and trigram similarity.
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    /// Replace every entry of `owner_id` with `entries`.
    async fn replace_owner(&self, owner_id: &str, entries: &[IndexEntry]) -> Result<()>;
    async fn delete_owner(&self, owner_id: &str) -> Result<()>;
    /// Every entry currently stored for `owner_id`, in insertion order.
    async fn owner_entries(&self, owner_id: &str) -> Result<Vec<IndexEntry>>;
    /// Entries of `language` with at least one non-zero component, best first.
    async fn search(&self, query: &str, language: Language, limit: usize) -> Result<Vec<LexicalHit>>;
    /// Curated entries of any language whose question contains `needle`,
    /// case-insensitively.
    async fn curated_containing(&self, needle: &str, limit: usize) -> Result<Vec<IndexEntry>>;
}

/// Case-insensitive substring test used by [`LexicalIndex::curated_containing`].
pub fn question_contains(entry: &IndexEntry, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    entry.source_type == SourceType::Curated
        && !needle.is_empty()
        && entry.question.to_lowercase().contains(&needle)
}

/// Dense vector index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Dimension of stored vectors, `None` while empty.
    async fn dims(&self) -> Result<Option<usize>>;
    /// Replace every point of `owner_id` with `points`.
    async fn replace_owner(&self, owner_id: &str, points: &[VectorPoint]) -> Result<()>;
    async fn delete_owner(&self, owner_id: &str) -> Result<()>;
    /// Nearest points, optionally restricted to one language.
    async fn search(&self, vector: &[f32], limit: usize, language: Option<Language>) -> Result<Vec<VectorHit>>;
}

/// Something that can be indexed.
#[derive(Debug, Clone)]
pub enum IndexItem {
    Segment(Segment),
    Curated(CuratedAnswer),
}

pub fn document_owner(document_id: &str) -> String {
    format!("document:{document_id}")
}

pub fn curated_owner(answer_id: &str) -> String {
    format!("curated:{answer_id}")
}

impl IndexItem {
    /// Index entries paired with the text to embed for each.
    fn entries(&self, owner_id: &str) -> Vec<(String, IndexEntry, String)> {
        match self {
            IndexItem::Segment(s) => {
                let entry = IndexEntry {
                    item_id: s.id.clone(),
                    owner_id: owner_id.to_string(),
                    language: s.language,
                    source_type: SourceType::Raw,
                    question: s.section_title.clone(),
                    answer: s.text.clone(),
                    title: s.document_title.clone(),
                    category: None,
                    is_current: true,
                    section: Some(s.section_title.clone()),
                };
                let text = format!("{} - {}\n{}", s.document_title, s.section_title, s.text);
                vec![(s.vector_ref.clone(), entry, text)]
            }
            IndexItem::Curated(ca) => ca
                .translations
                .iter()
                .filter(|(_, t)| !t.question.trim().is_empty() && !t.answer.trim().is_empty())
                .map(|(lang, t)| {
                    let entry = IndexEntry {
                        item_id: ca.id.clone(),
                        owner_id: owner_id.to_string(),
                        language: *lang,
                        source_type: SourceType::Curated,
                        question: ca.question_field(*lang).unwrap_or_default(),
                        answer: t.answer.clone(),
                        title: t.question.clone(),
                        category: ca.category.clone(),
                        is_current: ca.is_current,
                        section: None,
                    };
                    let text = format!("Question: {}\nAnswer: {}", t.question, t.answer);
                    (format!("faq_{}_{}", ca.id, lang.code()), entry, text)
                })
                .collect(),
        }
    }
}

/// Keeps a lexical and a vector index in sync per owner.
#[derive(Clone)]
pub struct DualIndex {
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn VectorIndex>,
    embedder: Option<Embedder>,
}

impl DualIndex {
    pub fn new(lexical: Arc<dyn LexicalIndex>, vector: Arc<dyn VectorIndex>, embedder: Option<Embedder>) -> Self {
        Self {
            lexical,
            vector,
            embedder,
        }
    }

    pub fn lexical(&self) -> &Arc<dyn LexicalIndex> {
        &self.lexical
    }

    pub fn vector(&self) -> &Arc<dyn VectorIndex> {
        &self.vector
    }

    pub fn embedder(&self) -> Option<&Embedder> {
        self.embedder.as_ref()
    }

    /// Replace everything `owner_id` has in both indexes with `items`.
    ///
    /// Embeddings are computed before anything is deleted, so an embedding
    /// failure leaves the previous state intact. When the vector write fails
    /// after the lexical one succeeded, the owner's previous lexical entries
    /// are restored before the error is returned. Without an embedder only
    /// the lexical index is populated.
    pub async fn index_upsert(&self, owner_id: &str, items: &[IndexItem]) -> Result<usize> {
        let prepared: Vec<(String, IndexEntry, String)> =
            items.iter().flat_map(|item| item.entries(owner_id)).collect();

        let points = match &self.embedder {
            Some(embedder) if !prepared.is_empty() => {
                let texts: Vec<String> = prepared.iter().map(|(_, _, t)| t.clone()).collect();
                let existing_dims = self.vector.dims().await?;
                let embedded = embedder
                    .embed(&texts, EmbedPurpose::Document, existing_dims)
                    .await?;
                prepared
                    .iter()
                    .zip(embedded.vectors)
                    .map(|((id, entry, _), vector)| VectorPoint {
                        id: id.clone(),
                        vector,
                        payload: entry.clone(),
                    })
                    .collect()
            }
            _ => Vec::new(),
        };

        let entries: Vec<IndexEntry> = prepared.into_iter().map(|(_, e, _)| e).collect();

        let previous = self.lexical.owner_entries(owner_id).await?;
        self.lexical.replace_owner(owner_id, &entries).await?;
        if let Err(e) = self.vector.replace_owner(owner_id, &points).await {
            if let Err(restore) = self.lexical.replace_owner(owner_id, &previous).await {
                tracing::error!(owner_id, error = %restore, "lexical rollback failed, indexes out of sync");
            }
            return Err(e);
        }

        tracing::debug!(
            owner_id,
            entries = entries.len(),
            vectors = points.len(),
            "indexed owner"
        );
        Ok(entries.len())
    }

    /// Remove everything `owner_id` has in both indexes.
    pub async fn index_delete(&self, owner_id: &str) -> Result<()> {
        self.lexical.delete_owner(owner_id).await?;
        self.vector.delete_owner(owner_id).await?;
        Ok(())
    }

    /// Embed a query with the query-side instruction and search the vector
    /// index. Fails with [`RagError::IndexUnavailable`] when no embedder is
    /// configured.
    pub async fn vector_search(
        &self,
        query: &str,
        limit: usize,
        language: Option<Language>,
    ) -> Result<Vec<VectorHit>> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| RagError::vector("no embedding provider configured"))?;
        let dims = self.vector.dims().await?;
        if dims.is_none() {
            return Ok(Vec::new());
        }
        let query_vec = embedder.embed_query(query, dims).await?;
        self.vector.search(&query_vec, limit, language).await
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{InMemoryLexicalIndex, InMemoryVectorIndex};
    use super::*;
    use crate::embedding::EmbeddingProvider;
    use crate::error::EmbeddingError;
    use crate::models::CuratedTranslation;
    use std::collections::BTreeMap;

    struct Hashing;

    #[async_trait]
    impl EmbeddingProvider for Hashing {
        fn model_name(&self) -> &str {
            "hashing"
        }
        fn dims(&self) -> usize {
            8
        }
        async fn embed(&self, texts: &[String], _p: EmbedPurpose) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; 8];
                    for (i, b) in t.bytes().enumerate() {
                        v[(b as usize + i) % 8] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    fn dual() -> DualIndex {
        DualIndex::new(
            Arc::new(InMemoryLexicalIndex::new()),
            Arc::new(InMemoryVectorIndex::new()),
            Some(Embedder::new(Arc::new(Hashing))),
        )
    }

    fn curated(id: &str) -> CuratedAnswer {
        let mut translations = BTreeMap::new();
        for (lang, q) in [(Language::En, "When does admission start?"), (Language::Uz, "Qabul qachon boshlanadi?")] {
            translations.insert(
                lang,
                CuratedTranslation {
                    question: q.into(),
                    answer: "July 1st".into(),
                    variants: vec![],
                },
            );
        }
        CuratedAnswer {
            id: id.into(),
            category: Some("Qabul".into()),
            translations,
            is_current: true,
            year: None,
            fact_refs: vec![],
        }
    }

    #[tokio::test]
    async fn test_upsert_one_entry_per_language() {
        let idx = dual();
        let n = idx
            .index_upsert(&curated_owner("1"), &[IndexItem::Curated(curated("1"))])
            .await
            .unwrap();
        assert_eq!(n, 2);
        let hits = idx.lexical().search("admission", Language::En, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        let vhits = idx.vector_search("admission", 10, None).await.unwrap();
        assert_eq!(vhits.len(), 2);
        assert!(vhits.iter().any(|h| h.point_id == "faq_1_en"));
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete_clears() {
        let idx = dual();
        let owner = curated_owner("1");
        idx.index_upsert(&owner, &[IndexItem::Curated(curated("1"))]).await.unwrap();
        idx.index_upsert(&owner, &[IndexItem::Curated(curated("1"))]).await.unwrap();
        assert_eq!(idx.vector_search("admission", 10, None).await.unwrap().len(), 2);

        idx.index_delete(&owner).await.unwrap();
        assert!(idx.lexical().search("admission", Language::En, 10).await.unwrap().is_empty());
        assert!(idx.vector_search("admission", 10, None).await.unwrap().is_empty());
    }

    struct FailingVectors;

    #[async_trait]
    impl VectorIndex for FailingVectors {
        async fn dims(&self) -> Result<Option<usize>> {
            Ok(None)
        }
        async fn replace_owner(&self, _owner_id: &str, _points: &[VectorPoint]) -> Result<()> {
            Err(RagError::vector("disk full"))
        }
        async fn delete_owner(&self, _owner_id: &str) -> Result<()> {
            Ok(())
        }
        async fn search(&self, _v: &[f32], _limit: usize, _language: Option<Language>) -> Result<Vec<VectorHit>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_failed_vector_write_restores_lexical_entries() {
        let lexical = Arc::new(InMemoryLexicalIndex::new());
        let owner = curated_owner("1");
        let healthy = DualIndex::new(lexical.clone(), Arc::new(InMemoryVectorIndex::new()), None);
        let mut old = curated("1");
        old.translations.remove(&Language::Uz);
        healthy.index_upsert(&owner, &[IndexItem::Curated(old)]).await.unwrap();
        let before = lexical.owner_entries(&owner).await.unwrap();
        assert_eq!(before.len(), 1);

        let broken = DualIndex::new(
            lexical.clone(),
            Arc::new(FailingVectors),
            Some(Embedder::new(Arc::new(Hashing))),
        );
        let err = broken
            .index_upsert(&owner, &[IndexItem::Curated(curated("1"))])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::IndexUnavailable { backend: "vector", .. }));
        assert_eq!(lexical.owner_entries(&owner).await.unwrap(), before);

        let fresh = curated_owner("2");
        broken
            .index_upsert(&fresh, &[IndexItem::Curated(curated("2"))])
            .await
            .unwrap_err();
        assert!(lexical.owner_entries(&fresh).await.unwrap().is_empty());
        assert_eq!(lexical.len(), 1);
    }

    #[tokio::test]
    async fn test_vector_search_without_embedder_is_unavailable() {
        let idx = DualIndex::new(
            Arc::new(InMemoryLexicalIndex::new()),
            Arc::new(InMemoryVectorIndex::new()),
            None,
        );
        let err = idx.vector_search("x", 5, None).await.unwrap_err();
        assert!(matches!(err, RagError::IndexUnavailable { backend: "vector", .. }));
    }
}
