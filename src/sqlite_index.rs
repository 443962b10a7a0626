//! SQLite-backed lexical and vector indexes.
//!
//! Lexical entries live in `index_entries` with a mirrored FTS5 table
//! (`index_entries_fts`). Scoring always happens in Rust through
//! [`LexicalComponents::compute`], so rankings match the in-memory backend.
//! For a language with at most `full_scan_limit` entries every entry is
//! scored; larger languages are first narrowed by an FTS5 prefix match.
//!
//! Vectors are stored as little-endian `f32` BLOBs in `index_vectors` and
//! searched by brute-force cosine distance.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use uniqa_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use uniqa_core::error::{EmbeddingError, RagError, Result};
use uniqa_core::index::{
    question_contains, IndexEntry, LexicalHit, LexicalIndex, VectorHit, VectorIndex, VectorPoint,
};
use uniqa_core::lexical::{tokenize, LexicalComponents, LexicalWeights};
use uniqa_core::models::{Language, SourceType};

const DEFAULT_FULL_SCAN_LIMIT: usize = 5000;
const FTS_CANDIDATES: i64 = 500;

fn source_type_from_str(s: &str) -> SourceType {
    match s {
        "curated" => SourceType::Curated,
        _ => SourceType::Raw,
    }
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> IndexEntry {
    let language: String = row.get("language");
    let source_type: String = row.get("source_type");
    let is_current: i64 = row.get("is_current");
    IndexEntry {
        item_id: row.get("item_id"),
        owner_id: row.get("owner_id"),
        language: Language::from_code(&language),
        source_type: source_type_from_str(&source_type),
        question: row.get("question"),
        answer: row.get("answer"),
        title: row.get("title"),
        category: row.get("category"),
        is_current: is_current != 0,
        section: row.get("section"),
    }
}

/// FTS5 query matching any term of `query` as a prefix.
///
/// Terms are double-quoted so user punctuation never reaches the FTS5 parser.
pub fn fts_query(query: &str, language: Language) -> Option<String> {
    let terms: Vec<String> = tokenize(query, language)
        .into_iter()
        .map(|t| t.replace('"', ""))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\"*"))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

pub struct SqliteLexicalIndex {
    pool: SqlitePool,
    weights: LexicalWeights,
    full_scan_limit: usize,
}

impl SqliteLexicalIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            weights: LexicalWeights::default(),
            full_scan_limit: DEFAULT_FULL_SCAN_LIMIT,
        }
    }

    pub fn with_weights(mut self, weights: LexicalWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Languages with more entries than this are prefiltered through FTS5.
    pub fn with_full_scan_limit(mut self, limit: usize) -> Self {
        self.full_scan_limit = limit;
        self
    }

    async fn count(&self, language: Language) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries WHERE language = ?")
            .bind(language.code())
            .fetch_one(&self.pool)
            .await
            .map_err(RagError::lexical)?;
        Ok(n.max(0) as usize)
    }

    async fn candidates(&self, query: &str, language: Language) -> Result<Vec<IndexEntry>> {
        let scan = self.count(language).await? <= self.full_scan_limit;
        let fts = if scan { None } else { fts_query(query, language) };

        let rows = match fts {
            None => sqlx::query("SELECT * FROM index_entries WHERE language = ?")
                .bind(language.code())
                .fetch_all(&self.pool)
                .await,
            Some(expr) => sqlx::query(
                r#"
                SELECT e.* FROM index_entries_fts
                JOIN index_entries e ON e.id = index_entries_fts.entry_id
                WHERE index_entries_fts MATCH ? AND index_entries_fts.language = ?
                ORDER BY bm25(index_entries_fts)
                LIMIT ?
                "#,
            )
            .bind(expr)
            .bind(language.code())
            .bind(FTS_CANDIDATES)
            .fetch_all(&self.pool)
            .await,
        }
        .map_err(RagError::lexical)?;

        Ok(rows.iter().map(entry_from_row).collect())
    }
}

#[async_trait]
impl LexicalIndex for SqliteLexicalIndex {
    async fn replace_owner(&self, owner_id: &str, entries: &[IndexEntry]) -> Result<()> {
        let write = async {
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                "DELETE FROM index_entries_fts WHERE entry_id IN (SELECT id FROM index_entries WHERE owner_id = ?)",
            )
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM index_entries WHERE owner_id = ?")
                .bind(owner_id)
                .execute(&mut *tx)
                .await?;

            for e in entries {
                let id = sqlx::query(
                    r#"
                    INSERT INTO index_entries
                        (item_id, owner_id, language, source_type, question, answer, title, category, is_current, section)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&e.item_id)
                .bind(owner_id)
                .bind(e.language.code())
                .bind(e.source_type.as_str())
                .bind(&e.question)
                .bind(&e.answer)
                .bind(&e.title)
                .bind(&e.category)
                .bind(e.is_current as i64)
                .bind(&e.section)
                .execute(&mut *tx)
                .await?
                .last_insert_rowid();

                sqlx::query("INSERT INTO index_entries_fts (entry_id, language, question, answer) VALUES (?, ?, ?, ?)")
                    .bind(id)
                    .bind(e.language.code())
                    .bind(&e.question)
                    .bind(&e.answer)
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await
        };
        write.await.map_err(RagError::lexical)
    }

    async fn delete_owner(&self, owner_id: &str) -> Result<()> {
        self.replace_owner(owner_id, &[]).await
    }

    async fn curated_containing(&self, needle: &str, limit: usize) -> Result<Vec<IndexEntry>> {
        // SQLite's lower() only folds ASCII, so Cyrillic matching happens here.
        let rows = sqlx::query("SELECT * FROM index_entries WHERE source_type = 'curated' ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(RagError::lexical)?;
        Ok(rows
            .iter()
            .map(entry_from_row)
            .filter(|e| question_contains(e, needle))
            .take(limit)
            .collect())
    }

    async fn owner_entries(&self, owner_id: &str) -> Result<Vec<IndexEntry>> {
        let rows = sqlx::query("SELECT * FROM index_entries WHERE owner_id = ? ORDER BY id")
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(RagError::lexical)?;
        Ok(rows.iter().map(entry_from_row).collect())
    }

    async fn search(&self, query: &str, language: Language, limit: usize) -> Result<Vec<LexicalHit>> {
        let mut hits: Vec<(f64, LexicalHit)> = self
            .candidates(query, language)
            .await?
            .into_iter()
            .filter_map(|entry| {
                let components = LexicalComponents::compute(query, &entry.question, &entry.answer, language);
                let score = components.score(&self.weights);
                (score > 0.0).then_some((score, LexicalHit { entry, components }))
            })
            .collect();

        hits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits.into_iter().map(|(_, h)| h).collect())
    }
}

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn dims(&self) -> Result<Option<usize>> {
        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM index_vectors LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(RagError::vector)?;
        Ok(dims.map(|d| d.max(0) as usize))
    }

    async fn replace_owner(&self, owner_id: &str, points: &[VectorPoint]) -> Result<()> {
        let others: Option<i64> = sqlx::query_scalar("SELECT dims FROM index_vectors WHERE owner_id != ? LIMIT 1")
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RagError::vector)?;
        let expected = others
            .map(|d| d.max(0) as usize)
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

        let write = async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM index_vectors WHERE owner_id = ?")
                .bind(owner_id)
                .execute(&mut *tx)
                .await?;
            for p in points {
                let payload = serde_json::to_string(&p.payload).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
                sqlx::query(
                    r#"
                    INSERT OR REPLACE INTO index_vectors (point_id, owner_id, language, dims, embedding, payload_json)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&p.id)
                .bind(owner_id)
                .bind(p.payload.language.code())
                .bind(p.vector.len() as i64)
                .bind(vec_to_blob(&p.vector))
                .bind(payload)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await
        };
        write.await.map_err(RagError::vector)
    }

    async fn delete_owner(&self, owner_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM index_vectors WHERE owner_id = ?")
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(RagError::vector)?;
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize, language: Option<Language>) -> Result<Vec<VectorHit>> {
        let rows = match language {
            Some(lang) => sqlx::query("SELECT point_id, embedding, payload_json FROM index_vectors WHERE language = ?")
                .bind(lang.code())
                .fetch_all(&self.pool)
                .await,
            None => sqlx::query("SELECT point_id, embedding, payload_json FROM index_vectors")
                .fetch_all(&self.pool)
                .await,
        }
        .map_err(RagError::vector)?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let payload_json: String = row.get("payload_json");
            let payload: IndexEntry = serde_json::from_str(&payload_json).map_err(RagError::vector)?;
            hits.push(VectorHit {
                point_id: row.get("point_id"),
                payload,
                distance: 1.0 - cosine_similarity(vector, &blob_to_vec(&blob)) as f64,
            });
        }

        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_path;
    use crate::migrate::run_migrations;

    async fn pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = connect_path(&dir.path().join("idx.sqlite")).await.unwrap();
        run_migrations(&pool).await.unwrap();
        (dir, pool)
    }

    fn entry(owner: &str, id: &str, lang: Language, question: &str, answer: &str) -> IndexEntry {
        IndexEntry {
            item_id: id.into(),
            owner_id: owner.into(),
            language: lang,
            source_type: SourceType::Curated,
            question: question.into(),
            answer: answer.into(),
            title: question.into(),
            category: Some("Qabul".into()),
            is_current: true,
            section: None,
        }
    }

    #[test]
    fn test_fts_query_quotes_terms() {
        assert_eq!(
            fts_query("dormitory \"rooms\"", Language::En).as_deref(),
            Some("\"dormitory\"* OR \"room\"*")
        );
        assert!(fts_query("the a", Language::En).is_none());
    }

    #[tokio::test]
    async fn test_lexical_scan_and_fts_paths_agree() {
        let (_dir, pool) = pool().await;
        let idx = SqliteLexicalIndex::new(pool.clone());
        idx.replace_owner(
            "curated:1",
            &[entry("curated:1", "1", Language::En, "When does admission start?", "Admission starts July 1st")],
        )
        .await
        .unwrap();
        idx.replace_owner(
            "curated:2",
            &[entry("curated:2", "2", Language::En, "Where is the dormitory?", "Near the main campus")],
        )
        .await
        .unwrap();

        let scan = idx.search("admission start", Language::En, 5).await.unwrap();
        assert_eq!(scan[0].entry.item_id, "1");

        let fts = SqliteLexicalIndex::new(pool).with_full_scan_limit(0);
        let hits = fts.search("admission start", Language::En, 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.item_id, "1");
        assert_eq!(hits[0].components, scan[0].components);
    }

    #[tokio::test]
    async fn test_curated_containing_folds_cyrillic_case() {
        let (_dir, pool) = pool().await;
        let idx = SqliteLexicalIndex::new(pool);
        idx.replace_owner(
            "curated:3",
            &[entry("curated:3", "3", Language::Ru, "Когда начинается Приём документов?", "С 1 июля")],
        )
        .await
        .unwrap();
        let mut raw = entry("document:d1", "s1", Language::Ru, "Приём документов", "Текст");
        raw.source_type = SourceType::Raw;
        idx.replace_owner("document:d1", &[raw]).await.unwrap();

        let hits = idx.curated_containing("приём документов", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item_id, "3");
        assert!(idx.curated_containing("   ", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lexical_replace_and_delete_owner() {
        let (_dir, pool) = pool().await;
        let idx = SqliteLexicalIndex::new(pool.clone()).with_full_scan_limit(0);
        let owner = "document:d1";
        idx.replace_owner(owner, &[entry(owner, "s1", Language::Ru, "общежитие", "общежитие есть")])
            .await
            .unwrap();
        idx.replace_owner(owner, &[entry(owner, "s2", Language::Ru, "общежитие", "общежитие есть")])
            .await
            .unwrap();
        let hits = idx.search("общежитие", Language::Ru, 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.item_id, "s2");
        let stored = idx.owner_entries(owner).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].item_id, "s2");

        idx.delete_owner(owner).await.unwrap();
        assert!(idx.search("общежитие", Language::Ru, 5).await.unwrap().is_empty());
        let fts_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries_fts")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(fts_rows, 0);
    }

    #[tokio::test]
    async fn test_vector_roundtrip_and_dims_guard() {
        let (_dir, pool) = pool().await;
        let idx = SqliteVectorIndex::new(pool);
        assert_eq!(idx.dims().await.unwrap(), None);

        let point = |id: &str, lang, v: Vec<f32>| VectorPoint {
            id: id.into(),
            vector: v,
            payload: entry("curated:1", id, lang, "q", "a"),
        };
        idx.replace_owner(
            "curated:1",
            &[point("faq_1_en", Language::En, vec![1.0, 0.0]), point("faq_1_uz", Language::Uz, vec![0.0, 1.0])],
        )
        .await
        .unwrap();
        assert_eq!(idx.dims().await.unwrap(), Some(2));

        let hits = idx.search(&[1.0, 0.0], 5, None).await.unwrap();
        assert_eq!(hits[0].point_id, "faq_1_en");
        assert!(hits[0].distance.abs() < 1e-6);
        let uz = idx.search(&[1.0, 0.0], 5, Some(Language::Uz)).await.unwrap();
        assert_eq!(uz.len(), 1);
        assert_eq!(uz[0].payload.language, Language::Uz);

        let err = idx
            .replace_owner("curated:2", &[point("faq_2_en", Language::En, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::Embedding(EmbeddingError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }
}
