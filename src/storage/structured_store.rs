use super::{now_ms, open_database, run_blocking, AccessCounters, StoreStats};
use crate::models::StructuredRecord;
use anyhow::Context;
use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

const DB_FILE: &str = "structured.sqlite";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        url TEXT PRIMARY KEY,
        payload TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );
";

/// Flat url → decoded document store.
///
/// One record per URL; `put` replaces the previous record in a single
/// statement, so concurrent writers to the same URL resolve last-write-wins.
pub struct StructuredStore {
    db: Arc<Mutex<Connection>>,
    counters: AccessCounters,
}

impl StructuredStore {
    pub fn new(base_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = open_database(base_path.as_ref(), DB_FILE, SCHEMA)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            counters: AccessCounters::default(),
        })
    }

    pub async fn get(&self, url: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.get_record(url).await?.map(|record| record.payload))
    }

    pub async fn get_record(&self, url: &str) -> anyhow::Result<Option<StructuredRecord>> {
        self.counters.read();
        let owned = url.to_string();
        run_blocking(&self.db, move |conn| {
            let row = conn
                .query_row(
                    "SELECT payload, updated_at FROM documents WHERE url = ?1",
                    params![owned],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()
                .context("reading structured document")?;
            let Some((payload, updated_at)) = row else {
                return Ok(None);
            };
            let payload: Value = serde_json::from_str(&payload)
                .with_context(|| format!("decoding stored document for {}", owned))?;
            Ok(Some(StructuredRecord {
                url: owned,
                payload,
                updated_at: Utc
                    .timestamp_millis_opt(updated_at)
                    .single()
                    .unwrap_or_default(),
            }))
        })
        .await
    }

    pub async fn put(&self, url: &str, document: &Value) -> anyhow::Result<()> {
        self.counters.write();
        let owned = url.to_string();
        let payload = document.to_string();
        let updated_at = now_ms();
        run_blocking(&self.db, move |conn| {
            conn.execute(
                "INSERT INTO documents (url, payload, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(url) DO UPDATE SET
                   payload = excluded.payload,
                   updated_at = excluded.updated_at",
                params![owned, payload, updated_at],
            )
            .context("writing structured document")?;
            Ok(())
        })
        .await
    }

    pub async fn delete(&self, url: &str) -> anyhow::Result<bool> {
        self.counters.write();
        let owned = url.to_string();
        run_blocking(&self.db, move |conn| {
            let count = conn.execute("DELETE FROM documents WHERE url = ?1", params![owned])?;
            Ok(count > 0)
        })
        .await
    }

    pub async fn count(&self) -> anyhow::Result<u64> {
        run_blocking(&self.db, |conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    /// Delete every document and reclaim space
    pub async fn clear_all(&self) -> anyhow::Result<u64> {
        self.counters.write();
        let deleted = run_blocking(&self.db, |conn| {
            let count = conn.execute("DELETE FROM documents", [])?;
            conn.execute_batch("VACUUM")?;
            Ok(count as u64)
        })
        .await?;

        tracing::info!("Cleared {} structured documents", deleted);
        Ok(deleted)
    }

    pub fn stats(&self) -> StoreStats {
        self.counters.snapshot()
    }
}
