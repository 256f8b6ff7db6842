//! Persistent stores
//!
//! Two independently-lifecycled SQLite databases live under the storage
//! directory: the generational response store and the flat structured
//! store. All SQLite work runs on the blocking pool so a slow disk never
//! stalls other in-flight requests; a write that has started completes
//! even if the request future awaiting it is dropped.

mod response_store;
mod structured_store;

pub use response_store::ResponseStore;
pub use structured_store::StructuredStore;

use anyhow::{anyhow, Context};
use rusqlite::Connection;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Read/write access counters for a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub reads: u64,
    pub writes: u64,
}

#[derive(Debug, Default)]
pub(crate) struct AccessCounters {
    reads: AtomicU64,
    writes: AtomicU64,
}

impl AccessCounters {
    pub(crate) fn read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StoreStats {
        StoreStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

/// Open (creating if needed) a database file under `base_path` and apply `schema`
pub(crate) fn open_database(base_path: &Path, file_name: &str, schema: &str) -> anyhow::Result<Connection> {
    if !base_path.exists() {
        fs::create_dir_all(base_path)
            .with_context(|| format!("creating storage directory {:?}", base_path))?;
    }
    let db_path = base_path.join(file_name);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("opening database at {:?}", db_path))?;
    conn.execute_batch(schema)
        .with_context(|| format!("applying schema to {:?}", db_path))?;
    Ok(conn)
}

/// Run `f` against the shared connection on the blocking pool
pub(crate) async fn run_blocking<T, F>(db: &Arc<Mutex<Connection>>, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || {
        let mut conn = db
            .lock()
            .map_err(|e| anyhow!("db mutex poisoned: {}", e))?;
        f(&mut conn)
    })
    .await?
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
