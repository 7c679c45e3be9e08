//! SQLite-backed [`VectorStore`].
//!
//! Entries live in `index_entries` with vectors as little-endian `f32`
//! BLOBs; the index-wide model and dimension live in `index_meta`. Every
//! mutation runs in one transaction, and WAL mode lets readers keep reading
//! the last committed state while a write is in progress. Writes from this
//! process are additionally serialized so two transactions never race to
//! upgrade their locks.
//!
//! Search loads all vectors and scores them in Rust.

use async_trait::async_trait;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::path::Path;
use tokio::sync::Mutex;

use super::{check_model, check_query, group_by_source, rank, VectorStore};
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{Error, Result};
use crate::migrate;
use crate::models::{IndexEntry, IndexModel, IndexStats, SearchHit, SourceRecord};

pub struct SqliteStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open the database at `path`, creating file and schema as needed.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool whose schema is already migrated.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn read_model(conn: &mut SqliteConnection) -> Result<Option<IndexModel>> {
    let rows = sqlx::query("SELECT key, value FROM index_meta WHERE key IN ('model', 'dims')")
        .fetch_all(&mut *conn)
        .await?;

    let mut model = None;
    let mut dims = None;
    for row in rows {
        let key: String = row.get("key");
        let value: String = row.get("value");
        match key.as_str() {
            "model" => model = Some(value),
            "dims" => {
                dims = Some(value.parse::<usize>().map_err(|e| {
                    Error::IndexUnavailable(format!("corrupt index_meta dims '{}': {}", value, e))
                })?)
            }
            _ => {}
        }
    }
    Ok(match (model, dims) {
        (Some(model), Some(dims)) => Some(IndexModel { model, dims }),
        _ => None,
    })
}

async fn write_model(conn: &mut SqliteConnection, model: &IndexModel) -> Result<()> {
    for (key, value) in [("model", model.model.clone()), ("dims", model.dims.to_string())] {
        sqlx::query(
            "INSERT INTO index_meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let recorded = read_model(&mut tx).await?;
        let model = match check_model(recorded.as_ref(), entries)? {
            Some(m) => m,
            None => return Ok(()),
        };
        if recorded.is_none() {
            write_model(&mut tx, &model).await?;
        }

        for (source_id, group) in group_by_source(entries) {
            sqlx::query("DELETE FROM index_entries WHERE source_id = ?")
                .bind(source_id)
                .execute(&mut *tx)
                .await?;
            for e in group {
                sqlx::query(
                    "INSERT INTO index_entries
                     (chunk_id, source_id, path, ordinal, text, vector, model, dims)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&e.chunk_id)
                .bind(&e.source_id)
                .bind(&e.path)
                .bind(e.ordinal as i64)
                .bind(&e.text)
                .bind(vec_to_blob(&e.vector))
                .bind(&e.model)
                .bind(e.vector.len() as i64)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn search(&self, query: &[f32], k: i64) -> Result<Vec<SearchHit>> {
        // Metadata and rows must come from the same snapshot.
        let mut tx = self.pool.begin().await?;
        let recorded = read_model(&mut tx).await?;
        check_query(query, k, recorded.as_ref())?;

        let rows = sqlx::query(
            "SELECT chunk_id, source_id, path, ordinal, text, vector FROM index_entries",
        )
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let hits = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                let ordinal: i64 = row.get("ordinal");
                SearchHit {
                    chunk_id: row.get("chunk_id"),
                    source_id: row.get("source_id"),
                    path: row.get("path"),
                    ordinal: ordinal as u32,
                    text: row.get("text"),
                    similarity: cosine_similarity(query, &blob_to_vec(&blob)) as f64,
                }
            })
            .collect();
        Ok(rank(hits, k))
    }

    async fn delete_by_source(&self, source_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM index_entries WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries")
            .fetch_one(&mut *tx)
            .await?;
        if remaining == 0 {
            sqlx::query("DELETE FROM index_meta").execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn sources(&self) -> Result<Vec<SourceRecord>> {
        let rows = sqlx::query(
            "SELECT source_id, path, COUNT(*) AS chunk_count
             FROM index_entries
             GROUP BY source_id, path
             ORDER BY path, source_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let count: i64 = row.get("chunk_count");
                SourceRecord {
                    source_id: row.get("source_id"),
                    path: row.get("path"),
                    chunk_count: count as usize,
                }
            })
            .collect())
    }

    async fn index_model(&self) -> Result<Option<IndexModel>> {
        let mut conn = self.pool.acquire().await?;
        read_model(&mut conn).await
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM index_entries")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM index_meta").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT source_id) AS sources, COUNT(*) AS entries FROM index_entries",
        )
        .fetch_one(&mut *conn)
        .await?;
        let sources: i64 = row.get("sources");
        let entries: i64 = row.get("entries");
        Ok(IndexStats {
            sources: sources as usize,
            entries: entries as usize,
            model: read_model(&mut conn).await?,
        })
    }
}
