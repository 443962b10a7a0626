use anyhow::Result;
use sqlx::SqlitePool;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        language TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'uploaded',
        version INTEGER NOT NULL DEFAULT 0,
        body TEXT NOT NULL,
        body_hash TEXT NOT NULL,
        error TEXT,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS segments (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        ordinal INTEGER NOT NULL,
        text TEXT NOT NULL,
        section_title TEXT NOT NULL,
        language TEXT NOT NULL,
        table_json TEXT,
        vector_ref TEXT NOT NULL,
        hash TEXT NOT NULL,
        UNIQUE(document_id, ordinal),
        FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS curated_answers (
        id TEXT PRIMARY KEY,
        category TEXT,
        is_current INTEGER NOT NULL DEFAULT 1,
        year TEXT,
        translations_json TEXT NOT NULL,
        fact_refs_json TEXT NOT NULL DEFAULT '[]',
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS index_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        item_id TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        language TEXT NOT NULL,
        source_type TEXT NOT NULL,
        question TEXT NOT NULL,
        answer TEXT NOT NULL,
        title TEXT NOT NULL,
        category TEXT,
        is_current INTEGER NOT NULL DEFAULT 1,
        section TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS index_vectors (
        point_id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        language TEXT NOT NULL,
        dims INTEGER NOT NULL,
        embedding BLOB NOT NULL,
        payload_json TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dynamic_facts (
        key TEXT PRIMARY KEY,
        values_json TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cache_entries (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        expires_at INTEGER NOT NULL
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_segments_document_id ON segments(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_index_entries_owner ON index_entries(owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_index_entries_language ON index_entries(language)",
    "CREATE INDEX IF NOT EXISTS idx_index_vectors_owner ON index_vectors(owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at)",
];

/// Create every table and index. Safe to run on an existing database.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for ddl in TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='index_entries_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE index_entries_fts USING fts5(
                entry_id UNINDEXED,
                language UNINDEXED,
                question,
                answer
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }

    tracing::debug!("migrations applied");
    Ok(())
}
