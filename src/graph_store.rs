//! SQLite-backed knowledge graph store.
//!
//! Persists entity/relation triples extracted from chunk text and serves
//! keyword lookups for hybrid retrieval. Writes are idempotent
//! (`INSERT OR IGNORE` on the unique subject/relation/object/source tuple),
//! which is what makes unordered concurrent extraction workers safe — the
//! store itself is the synchronization boundary.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::db;
use crate::models::{ExtractedGraph, KnowledgeFact};

pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    /// Open the store at `path`, creating the schema when missing.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open a private in-memory store. Used by tests.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = db::connect_in_memory().await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and indexes. Idempotent.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                first_seen INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject TEXT NOT NULL,
                relation TEXT NOT NULL,
                object TEXT NOT NULL,
                source_doc TEXT NOT NULL,
                page_number INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(subject, relation, object, source_doc)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_relations_subject ON relations(subject)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_relations_object ON relations(object)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_relations_created_at ON relations(created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist the entities and relations extracted from one chunk.
    ///
    /// Insert-if-absent per unique tuple: replaying the same graph is a
    /// no-op, so concurrent workers may complete in any order.
    pub async fn add_knowledge(
        &self,
        graph: &ExtractedGraph,
        source_doc: &str,
        page_number: u32,
    ) -> Result<()> {
        if graph.is_empty() {
            return Ok(());
        }

        let now = chrono::Utc::now().timestamp();

        for entity in &graph.entities {
            sqlx::query("INSERT OR IGNORE INTO entities (name, kind, first_seen) VALUES (?, ?, ?)")
                .bind(&entity.name)
                .bind(&entity.kind)
                .bind(now)
                .execute(&self.pool)
                .await?;
        }

        for rel in &graph.relations {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO relations
                    (subject, relation, object, source_doc, page_number, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&rel.subject)
            .bind(&rel.relation)
            .bind(&rel.object)
            .bind(source_doc)
            .bind(page_number as i64)
            .bind(now)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Relations connected to a keyword (substring match over subject and
    /// object), newest first.
    pub async fn query_relations(&self, keyword: &str, limit: usize) -> Result<Vec<KnowledgeFact>> {
        let pattern = format!("%{}%", keyword);
        let rows = sqlx::query(
            r#"
            SELECT subject, relation, object, source_doc, page_number
            FROM relations
            WHERE subject LIKE ? OR object LIKE ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let facts = rows
            .iter()
            .map(|row| {
                let page_number: i64 = row.get("page_number");
                KnowledgeFact {
                    subject: row.get("subject"),
                    relation: row.get("relation"),
                    object: row.get("object"),
                    source_doc: row.get("source_doc"),
                    page_number: page_number as u32,
                }
            })
            .collect();

        Ok(facts)
    }

    /// Total number of known entities.
    pub async fn count_entities(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Total number of stored relations.
    pub async fn count_relations(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM relations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
