//! SQLite persistence for documents, segments, curated answers, dynamic
//! facts and cached answers.
//!
//! [`SqliteFactStore`] and [`SqliteCacheBackend`] plug into the core's
//! [`FactStore`] and [`CacheBackend`] seams.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use uniqa_core::cache::CacheBackend;
use uniqa_core::error::RagError;
use uniqa_core::facts::FactStore;
use uniqa_core::models::{
    CuratedAnswer, CuratedTranslation, Document, DocumentStatus, DynamicFact, Language, Segment, TableStructure,
};

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Documents, their segments and curated answers.
#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or replace a document's metadata and body.
    ///
    /// A changed body resets the status to `uploaded`; the version is kept.
    pub async fn upsert_document(&self, doc: &Document) -> Result<()> {
        let body_hash = sha256_hex(&doc.body);
        sqlx::query(
            r#"
            INSERT INTO documents (id, title, language, status, version, body, body_hash, error, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                language = excluded.language,
                status = CASE WHEN documents.body_hash = excluded.body_hash
                              THEN documents.status ELSE excluded.status END,
                body = excluded.body,
                body_hash = excluded.body_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.title)
        .bind(doc.language.code())
        .bind(DocumentStatus::Uploaded.as_str())
        .bind(doc.version as i64)
        .bind(&doc.body)
        .bind(&body_hash)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to store document {}", doc.id))?;
        Ok(())
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT id, title, language, status, version, body FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| {
            let language: String = row.get("language");
            let status: String = row.get("status");
            let version: i64 = row.get("version");
            Document {
                id: row.get("id"),
                title: row.get("title"),
                language: Language::from_code(&language),
                status: DocumentStatus::parse(&status).unwrap_or(DocumentStatus::Failed),
                version: version.max(0) as u32,
                body: row.get("body"),
            }
        }))
    }

    pub async fn document_error(&self, id: &str) -> Result<Option<String>> {
        let error: Option<Option<String>> = sqlx::query_scalar("SELECT error FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(error.flatten())
    }

    pub async fn set_status(&self, id: &str, status: DocumentStatus, error: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE documents SET status = ?, error = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error)
            .bind(Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replace the document's segments, mark it ready and bump its version.
    pub async fn commit_segments(&self, document_id: &str, segments: &[Segment]) -> Result<u32> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM segments WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for seg in segments {
            let table_json = seg.table.as_ref().map(serde_json::to_string).transpose()?;
            sqlx::query(
                r#"
                INSERT INTO segments (id, document_id, ordinal, text, section_title, language, table_json, vector_ref, hash)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&seg.id)
            .bind(&seg.document_id)
            .bind(seg.ordinal as i64)
            .bind(&seg.text)
            .bind(&seg.section_title)
            .bind(seg.language.code())
            .bind(table_json)
            .bind(&seg.vector_ref)
            .bind(&seg.hash)
            .execute(&mut *tx)
            .await?;
        }

        let version: i64 = sqlx::query_scalar(
            "UPDATE documents SET status = 'ready', error = NULL, version = version + 1, updated_at = ? WHERE id = ? RETURNING version",
        )
        .bind(Utc::now().timestamp())
        .bind(document_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(version.max(0) as u32)
    }

    pub async fn segments(&self, document_id: &str) -> Result<Vec<Segment>> {
        let rows = sqlx::query(
            r#"
            SELECT s.*, d.title AS document_title FROM segments s
            JOIN documents d ON d.id = s.document_id
            WHERE s.document_id = ?
            ORDER BY s.ordinal
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let language: String = row.get("language");
            let ordinal: i64 = row.get("ordinal");
            let table_json: Option<String> = row.get("table_json");
            let table: Option<TableStructure> = table_json.as_deref().map(serde_json::from_str).transpose()?;
            out.push(Segment {
                id: row.get("id"),
                document_id: row.get("document_id"),
                ordinal: ordinal.max(0) as usize,
                text: row.get("text"),
                section_title: row.get("section_title"),
                document_title: row.get("document_title"),
                language: Language::from_code(&language),
                table,
                vector_ref: row.get("vector_ref"),
                hash: row.get("hash"),
            });
        }
        Ok(out)
    }

    /// Delete a document and (by cascade) its segments.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn upsert_curated(&self, answer: &CuratedAnswer) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO curated_answers (id, category, is_current, year, translations_json, fact_refs_json, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                category = excluded.category,
                is_current = excluded.is_current,
                year = excluded.year,
                translations_json = excluded.translations_json,
                fact_refs_json = excluded.fact_refs_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&answer.id)
        .bind(&answer.category)
        .bind(answer.is_current as i64)
        .bind(&answer.year)
        .bind(serde_json::to_string(&answer.translations)?)
        .bind(serde_json::to_string(&answer.fact_refs)?)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to store curated answer {}", answer.id))?;
        Ok(())
    }

    pub async fn curated_answers(&self) -> Result<Vec<CuratedAnswer>> {
        let rows = sqlx::query("SELECT * FROM curated_answers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let translations_json: String = row.get("translations_json");
            let fact_refs_json: String = row.get("fact_refs_json");
            let is_current: i64 = row.get("is_current");
            let id: String = row.get("id");
            let translations: BTreeMap<Language, CuratedTranslation> = serde_json::from_str(&translations_json)
                .with_context(|| format!("Corrupt translations for curated answer {id}"))?;
            out.push(CuratedAnswer {
                id,
                category: row.get("category"),
                translations,
                is_current: is_current != 0,
                year: row.get("year"),
                fact_refs: serde_json::from_str(&fact_refs_json)?,
            });
        }
        Ok(out)
    }

    pub async fn delete_curated(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM curated_answers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Clone)]
pub struct SqliteFactStore {
    pool: SqlitePool,
}

impl SqliteFactStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, fact: &DynamicFact) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dynamic_facts (key, values_json, is_active, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                values_json = excluded.values_json,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&fact.key)
        .bind(serde_json::to_string(&fact.values)?)
        .bind(fact.is_active as i64)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl FactStore for SqliteFactStore {
    async fn active_facts(&self, keys: &[String]) -> uniqa_core::Result<Vec<DynamicFact>> {
        let mut out = Vec::new();
        for key in keys {
            let row = sqlx::query("SELECT values_json FROM dynamic_facts WHERE key = ? AND is_active = 1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| RagError::Store(e.to_string()))?;
            if let Some(row) = row {
                let values_json: String = row.get("values_json");
                let values: BTreeMap<Language, String> =
                    serde_json::from_str(&values_json).map_err(|e| RagError::Store(format!("fact {key}: {e}")))?;
                out.push(DynamicFact {
                    key: key.clone(),
                    values,
                    is_active: true,
                });
            }
        }
        Ok(out)
    }
}

/// Cache entries in the `cache_entries` table with lazy expiry.
#[derive(Clone)]
pub struct SqliteCacheBackend {
    pool: SqlitePool,
}

impl SqliteCacheBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn cache_err(e: sqlx::Error) -> RagError {
    RagError::Cache(e.to_string())
}

#[async_trait]
impl CacheBackend for SqliteCacheBackend {
    async fn get(&self, key: &str) -> uniqa_core::Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM cache_entries WHERE key = ? AND expires_at > ?")
            .bind(key)
            .bind(Utc::now().timestamp())
            .fetch_optional(&self.pool)
            .await
            .map_err(cache_err)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> uniqa_core::Result<()> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(ttl_secs).map_err(|_| RagError::Cache(format!("ttl too large: {ttl_secs}")))?;
        let expires_at = now
            .checked_add(ttl)
            .ok_or_else(|| RagError::Cache(format!("ttl too large: {ttl_secs}")))?;

        sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(cache_err)?;
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(cache_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> uniqa_core::Result<()> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(cache_err)?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> uniqa_core::Result<usize> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE substr(key, 1, ?) = ?")
            .bind(prefix.chars().count() as i64)
            .bind(prefix)
            .execute(&self.pool)
            .await
            .map_err(cache_err)?;
        Ok(result.rows_affected() as usize)
    }

    async fn count_prefix(&self, prefix: &str) -> uniqa_core::Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries WHERE substr(key, 1, ?) = ? AND expires_at > ?")
            .bind(prefix.chars().count() as i64)
            .bind(prefix)
            .bind(Utc::now().timestamp())
            .fetch_one(&self.pool)
            .await
            .map_err(cache_err)?;
        Ok(n.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_path;
    use crate::migrate::run_migrations;

    async fn pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = connect_path(&dir.path().join("store.sqlite")).await.unwrap();
        run_migrations(&pool).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn test_document_status_and_version() {
        let (_dir, pool) = pool().await;
        let store = DocumentStore::new(pool);
        let doc = Document::new("d1", "Nizom", Language::Uz, "Matn");
        store.upsert_document(&doc).await.unwrap();

        let loaded = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Uploaded);
        assert_eq!(loaded.version, 0);

        store.set_status("d1", DocumentStatus::Failed, Some("empty")).await.unwrap();
        assert_eq!(store.document_error("d1").await.unwrap().as_deref(), Some("empty"));

        assert_eq!(store.commit_segments("d1", &[]).await.unwrap(), 1);
        assert_eq!(store.commit_segments("d1", &[]).await.unwrap(), 2);
        let loaded = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Ready);
        assert!(store.document_error("d1").await.unwrap().is_none());

        // Same body keeps the ready status
        store.upsert_document(&doc).await.unwrap();
        assert_eq!(store.get_document("d1").await.unwrap().unwrap().status, DocumentStatus::Ready);
    }

    #[tokio::test]
    async fn test_curated_roundtrip() {
        let (_dir, pool) = pool().await;
        let store = DocumentStore::new(pool);
        let mut translations = BTreeMap::new();
        translations.insert(
            Language::Ru,
            CuratedTranslation {
                question: "Есть ли общежитие?".into(),
                answer: "Да, есть.".into(),
                variants: vec!["Общежитие".into()],
            },
        );
        let answer = CuratedAnswer {
            id: "7".into(),
            category: Some("Yotoqxona".into()),
            translations,
            is_current: true,
            year: Some("2025-2026".into()),
            fact_refs: vec!["dorm_price".into()],
        };
        store.upsert_curated(&answer).await.unwrap();
        assert_eq!(store.curated_answers().await.unwrap(), vec![answer]);
        assert!(store.delete_curated("7").await.unwrap());
        assert!(store.curated_answers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fact_store_skips_inactive() {
        let (_dir, pool) = pool().await;
        let store = SqliteFactStore::new(pool);
        let mut values = BTreeMap::new();
        values.insert(Language::Uz, "+998 71 000 00 00".to_string());
        store
            .upsert(&DynamicFact {
                key: "phone".into(),
                values: values.clone(),
                is_active: true,
            })
            .await
            .unwrap();
        store
            .upsert(&DynamicFact {
                key: "old_phone".into(),
                values,
                is_active: false,
            })
            .await
            .unwrap();

        let facts = store
            .active_facts(&["old_phone".to_string(), "phone".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].key, "phone");
    }

    #[tokio::test]
    async fn test_cache_backend_prefix_and_expiry() {
        let (_dir, pool) = pool().await;
        let cache = SqliteCacheBackend::new(pool);
        cache.set("rag:v1:a", "1", 3600).await.unwrap();
        cache.set("rag:v1:b", "2", 3600).await.unwrap();
        cache.set("other:c", "3", 3600).await.unwrap();
        cache.set("rag:v1:expired", "4", 0).await.unwrap();

        assert_eq!(cache.get("rag:v1:a").await.unwrap().as_deref(), Some("1"));
        assert!(cache.get("rag:v1:expired").await.unwrap().is_none());
        assert_eq!(cache.count_prefix("rag:v1:").await.unwrap(), 2);

        cache.delete_prefix("rag:v1:").await.unwrap();
        assert_eq!(cache.count_prefix("rag:v1:").await.unwrap(), 0);
        assert_eq!(cache.get("other:c").await.unwrap().as_deref(), Some("3"));
    }
}
