use super::{now_ms, open_database, run_blocking, AccessCounters, StoreStats};
use crate::models::{CachedResponse, Generation, GenerationHandle, RequestIdentity};
use anyhow::{bail, Context};
use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

const DB_FILE: &str = "responses.sqlite";
const ACTIVE_KEY: &str = "active_generation";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS generations (
        name TEXT PRIMARY KEY,
        created_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS entries (
        generation TEXT NOT NULL,
        method TEXT NOT NULL,
        url TEXT NOT NULL,
        status INTEGER NOT NULL,
        headers TEXT NOT NULL,
        body BLOB NOT NULL,
        stored_at INTEGER NOT NULL,
        PRIMARY KEY (generation, method, url)
    );
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

/// Request identity → response snapshots, partitioned into named generations.
///
/// The active generation pointer lives behind an async `RwLock`. Lookups
/// against the active generation hold the read side for the whole query,
/// and activation holds the write side while it swaps the pointer and
/// sweeps every other generation, so a reader never observes a
/// half-deleted generation in place of the active one.
pub struct ResponseStore {
    db: Arc<Mutex<Connection>>,
    active: RwLock<Option<String>>,
    counters: AccessCounters,
}

impl ResponseStore {
    pub fn new(base_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = open_database(base_path.as_ref(), DB_FILE, SCHEMA)?;
        let active: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![ACTIVE_KEY],
                |row| row.get(0),
            )
            .optional()
            .context("reading active generation")?;

        if let Some(name) = &active {
            tracing::debug!("Restored active generation {}", name);
        }

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            active: RwLock::new(active),
            counters: AccessCounters::default(),
        })
    }

    /// Create the generation if it does not exist yet and return a handle to it
    pub async fn open_generation(&self, name: &str) -> anyhow::Result<GenerationHandle> {
        let owned = name.to_string();
        let created_at = now_ms();
        run_blocking(&self.db, move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?1, ?2)",
                params![owned, created_at],
            )
            .context("creating generation")?;
            Ok(())
        })
        .await?;
        Ok(GenerationHandle::new(name))
    }

    pub async fn generation_exists(&self, name: &str) -> anyhow::Result<bool> {
        let owned = name.to_string();
        run_blocking(&self.db, move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM generations WHERE name = ?1)",
                params![owned],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await
    }

    pub async fn get(
        &self,
        handle: &GenerationHandle,
        identity: &RequestIdentity,
    ) -> anyhow::Result<Option<CachedResponse>> {
        self.counters.read();
        let generation = handle.name().to_string();
        let method = identity.method.to_string();
        let url = identity.url.clone();
        run_blocking(&self.db, move |conn| {
            let row = conn
                .query_row(
                    "SELECT status, headers, body FROM entries
                     WHERE generation = ?1 AND method = ?2 AND url = ?3",
                    params![generation, method, url],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                        ))
                    },
                )
                .optional()
                .context("reading cached response")?;
            row.map(|(status, headers, body)| decode_entry(status, &headers, body))
                .transpose()
        })
        .await
    }

    /// Store a snapshot in the given generation. Writing into a generation
    /// that was swept (or never opened) fails instead of resurrecting it.
    pub async fn put(
        &self,
        handle: &GenerationHandle,
        identity: &RequestIdentity,
        response: &CachedResponse,
    ) -> anyhow::Result<()> {
        self.counters.write();
        let generation = handle.name().to_string();
        let method = identity.method.to_string();
        let url = identity.url.clone();
        let status = i64::from(response.status());
        let headers = serde_json::to_string(response.headers()).context("encoding headers")?;
        let body = response.body().to_vec();
        let stored_at = now_ms();

        run_blocking(&self.db, move |conn| {
            let tx = conn.transaction()?;
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM generations WHERE name = ?1)",
                params![generation],
                |row| row.get(0),
            )?;
            if !exists {
                bail!("generation {} does not exist", generation);
            }
            tx.execute(
                "INSERT OR REPLACE INTO entries
                   (generation, method, url, status, headers, body, stored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![generation, method, url, status, headers, body, stored_at],
            )
            .context("inserting cached response")?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Handle to the currently active generation, if one was activated
    pub async fn active(&self) -> Option<GenerationHandle> {
        self.active.read().await.as_deref().map(GenerationHandle::new)
    }

    /// Look up `identity` in the active generation
    pub async fn match_active(
        &self,
        identity: &RequestIdentity,
    ) -> anyhow::Result<Option<CachedResponse>> {
        let active = self.active.read().await;
        match active.as_deref() {
            Some(name) => self.get(&GenerationHandle::new(name), identity).await,
            None => Ok(None),
        }
    }

    /// Store a snapshot in the active generation
    pub async fn put_active(
        &self,
        identity: &RequestIdentity,
        response: &CachedResponse,
    ) -> anyhow::Result<()> {
        let active = self.active.read().await;
        match active.as_deref() {
            Some(name) => {
                self.put(&GenerationHandle::new(name), identity, response)
                    .await
            }
            None => bail!("no active generation to store {}", identity),
        }
    }

    /// Make `name` the active generation and sweep every other generation.
    ///
    /// Returns the names of the generations that were removed.
    pub async fn activate(&self, name: &str) -> anyhow::Result<Vec<String>> {
        let mut active = self.active.write().await;
        let target = name.to_string();
        let removed = run_blocking(&self.db, move |conn| {
            let tx = conn.transaction()?;
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM generations WHERE name = ?1)",
                params![target],
                |row| row.get(0),
            )?;
            if !exists {
                bail!("cannot activate missing generation {}", target);
            }

            let mut removed = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "SELECT name FROM generations WHERE name != ?1 ORDER BY created_at, name",
                )?;
                let rows = stmt.query_map(params![target], |row| row.get::<_, String>(0))?;
                for row in rows {
                    removed.push(row?);
                }
            }

            tx.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                params![ACTIVE_KEY, target],
            )?;
            tx.execute("DELETE FROM entries WHERE generation != ?1", params![target])?;
            tx.execute("DELETE FROM generations WHERE name != ?1", params![target])?;
            tx.commit().context("committing generation swap")?;
            Ok(removed)
        })
        .await?;

        *active = Some(name.to_string());
        if !removed.is_empty() {
            tracing::info!("Swept {} stale generation(s): {:?}", removed.len(), removed);
        }
        Ok(removed)
    }

    /// Names of every generation on disk, oldest first
    pub async fn list_generations(&self) -> anyhow::Result<Vec<String>> {
        Ok(self
            .generations()
            .await?
            .into_iter()
            .map(|generation| generation.name)
            .collect())
    }

    pub async fn generations(&self) -> anyhow::Result<Vec<Generation>> {
        run_blocking(&self.db, |conn| {
            let mut stmt =
                conn.prepare("SELECT name, created_at FROM generations ORDER BY created_at, name")?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let name: String = row.get(0)?;
                let created_at: i64 = row.get(1)?;
                out.push(Generation {
                    name,
                    created_at: Utc
                        .timestamp_millis_opt(created_at)
                        .single()
                        .unwrap_or_default(),
                });
            }
            Ok(out)
        })
        .await
    }

    /// Delete a generation and all of its entries. The active generation
    /// can only be replaced through [`ResponseStore::activate`].
    pub async fn delete_generation(&self, name: &str) -> anyhow::Result<bool> {
        let active = self.active.read().await;
        if active.as_deref() == Some(name) {
            bail!("refusing to delete the active generation {}", name);
        }
        let owned = name.to_string();
        let deleted = run_blocking(&self.db, move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM entries WHERE generation = ?1", params![owned])?;
            let count = tx.execute("DELETE FROM generations WHERE name = ?1", params![owned])?;
            tx.commit()?;
            Ok(count > 0)
        })
        .await?;
        drop(active);

        if deleted {
            tracing::info!("Deleted generation {}", name);
        }
        Ok(deleted)
    }

    /// Number of entries stored in a generation
    pub async fn count(&self, handle: &GenerationHandle) -> anyhow::Result<u64> {
        let generation = handle.name().to_string();
        run_blocking(&self.db, move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM entries WHERE generation = ?1",
                params![generation],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    pub fn stats(&self) -> StoreStats {
        self.counters.snapshot()
    }
}

fn decode_entry(status: i64, headers: &str, body: Vec<u8>) -> anyhow::Result<CachedResponse> {
    let status = u16::try_from(status).context("stored status out of range")?;
    let headers: Vec<(String, String)> =
        serde_json::from_str(headers).context("decoding stored headers")?;
    Ok(CachedResponse::from_parts(status, headers, body))
}
