//! Document processing and curated-answer sync.
//!
//! A document moves `uploaded → processing → ready`, or `failed` with the
//! error recorded. Processing chunks the body, replaces the document's
//! entries in both indexes and then commits the segments, bumping the
//! version. When indexing fails the owner's previous lexical entries are
//! restored, the segments are not committed and the document is marked
//! failed with the error.

use anyhow::Result;
use uuid::Uuid;

use uniqa_core::cache::AnswerCache;
use uniqa_core::chunk::Chunker;
use uniqa_core::index::{curated_owner, document_owner, DualIndex, IndexItem};
use uniqa_core::models::{CuratedAnswer, Document, DocumentStatus, Language};

use crate::store::DocumentStore;

/// Outcome of processing one document.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub document_id: String,
    pub segments: usize,
    pub version: u32,
}

pub struct Ingestor {
    store: DocumentStore,
    chunker: Chunker,
    index: DualIndex,
    cache: Option<AnswerCache>,
}

impl Ingestor {
    pub fn new(store: DocumentStore, chunker: Chunker, index: DualIndex) -> Self {
        Self {
            store,
            chunker,
            index,
            cache: None,
        }
    }

    /// Clear cached answers whenever indexed content changes.
    pub fn with_cache(mut self, cache: AnswerCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    async fn content_changed(&self) {
        if let Some(cache) = &self.cache {
            cache.clear_all().await;
        }
    }

    /// Store new text under a fresh id and process it.
    pub async fn upload(&self, title: &str, language: Language, body: &str) -> Result<IngestReport> {
        let document = Document::new(Uuid::new_v4().to_string(), title, language, body);
        self.add_document(&document).await
    }

    /// Store `document` and process it.
    pub async fn add_document(&self, document: &Document) -> Result<IngestReport> {
        self.store.upsert_document(document).await?;
        self.process_document(&document.id).await
    }

    /// (Re)process a stored document.
    pub async fn process_document(&self, document_id: &str) -> Result<IngestReport> {
        let document = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Document not found: {}", document_id))?;

        self.store
            .set_status(document_id, DocumentStatus::Processing, None)
            .await?;

        let indexed = async {
            let segments = self.chunker.chunk(&document)?;
            let items: Vec<IndexItem> = segments.iter().cloned().map(IndexItem::Segment).collect();
            self.index
                .index_upsert(&document_owner(document_id), &items)
                .await?;
            Ok::<_, uniqa_core::RagError>(segments)
        }
        .await;

        let segments = match indexed {
            Ok(segments) => segments,
            Err(e) => {
                tracing::warn!(document_id, error = %e, "document processing failed");
                self.store
                    .set_status(document_id, DocumentStatus::Failed, Some(&e.to_string()))
                    .await?;
                return Err(e.into());
            }
        };

        let version = self.store.commit_segments(document_id, &segments).await?;
        self.content_changed().await;

        tracing::info!(
            document_id,
            title = %document.title,
            segments = segments.len(),
            version,
            "document ready"
        );
        Ok(IngestReport {
            document_id: document_id.to_string(),
            segments: segments.len(),
            version,
        })
    }

    /// Remove a document from the store and both indexes.
    pub async fn delete_document(&self, document_id: &str) -> Result<bool> {
        self.index.index_delete(&document_owner(document_id)).await?;
        let removed = self.store.delete_document(document_id).await?;
        self.content_changed().await;
        Ok(removed)
    }

    /// Store and index every curated answer, one entry per translated
    /// language. Returns the number of index entries written.
    pub async fn sync_curated(&self, answers: &[CuratedAnswer]) -> Result<usize> {
        let mut written = 0;
        for answer in answers {
            self.store.upsert_curated(answer).await?;
            written += self
                .index
                .index_upsert(&curated_owner(&answer.id), &[IndexItem::Curated(answer.clone())])
                .await?;
        }
        self.content_changed().await;
        tracing::info!(answers = answers.len(), entries = written, "curated answers synced");
        Ok(written)
    }

    /// Re-index every stored curated answer.
    pub async fn resync_curated(&self) -> Result<usize> {
        let answers = self.store.curated_answers().await?;
        self.sync_curated(&answers).await
    }

    pub async fn remove_curated(&self, answer_id: &str) -> Result<bool> {
        self.index.index_delete(&curated_owner(answer_id)).await?;
        let removed = self.store.delete_curated(answer_id).await?;
        self.content_changed().await;
        Ok(removed)
    }
}
