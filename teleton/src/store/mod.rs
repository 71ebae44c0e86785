//! Embedded SQL substrate: one SQLite file with FTS5 companions and
//! sqlite-vec `vec0` virtual tables.
//!
//! All blocking work runs on `spawn_blocking`; the single connection behind a
//! mutex serialises writers (SQLite has one writer at a time). Prepared
//! statements go through `prepare_cached` on that connection.

mod cron;
mod embedding_cache;
mod knowledge;
mod migrations;
mod sessions;
mod tasks;
mod tool_config;
mod tool_index;
mod transcript;

pub use cron::CronJobRow;
pub use embedding_cache::EMBEDDING_CACHE_MAX_ROWS;
pub use knowledge::{KnowledgeChunk, KnowledgeSource};
pub use sessions::SessionRow;
pub use tasks::{TaskRow, TaskStatus};
pub use tool_config::{GroupModuleLevel, ToolConfigRow, RESERVED_MODULES};
pub use tool_index::ToolIndexHit;
pub use transcript::MessageRow;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::Connection;
use thiserror::Error;
use tracing::warn;

static SQLITE_VEC_INIT: Once = Once::new();

fn init_vector_extension() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Unix millis now.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("migration failed at {version}: {message}")]
    Migration { version: String, message: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("blocked statement: {0}")]
    BlockedStatement(String),
    #[error("embedding error: {0}")]
    Embedding(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

/// Serialises an f32 vector as little-endian bytes for BLOB columns.
pub fn vector_to_blob(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for f in v {
        out.extend_from_slice(&f.to_le_bytes());
    }
    out
}

/// Parses a BLOB column back into an f32 vector.
pub fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// The embedded store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Store {
    /// Opens or creates the database, applies WAL + cache/mmap pragmas and
    /// enables foreign keys. Call [`Store::migrate`] before first use.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        init_vector_extension();
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        // journal_mode and mmap_size return a result row; cache_size and
        // foreign_keys do not.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.query_row("PRAGMA mmap_size = 268435456", [], |_| Ok(()))?;
        conn.execute_batch("PRAGMA cache_size = -64000; PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        init_vector_extension();
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` against the connection on the blocking pool.
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Storage("connection mutex poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    /// Synchronous variant for startup paths (open/migrate run before the
    /// runtime is fully up).
    pub(crate) fn with_conn_sync<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| StoreError::Storage("connection mutex poisoned".into()))?;
        f(&mut guard)
    }

    /// Applies the idempotent DDL and the version ladder. Any failure here is
    /// fatal for startup; nothing is partially applied outside a step.
    pub fn migrate(&self) -> Result<(), StoreError> {
        self.with_conn_sync(migrations::run)
    }

    /// Current schema version from `meta`, if the store was migrated.
    pub fn schema_version(&self) -> Result<Option<String>, StoreError> {
        self.with_conn_sync(|conn| get_meta(conn, "schema_version"))
    }

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| get_meta(conn, &key)).await
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| set_meta(conn, &key, &value))
            .await
    }

    /// Creates the vector virtual tables for `dims`. A pre-existing set with a
    /// different dimension is dropped and recreated; stored embedding blobs
    /// are cleared so they re-populate from the embedding cache or provider.
    pub fn ensure_vector_tables(&self, dims: usize) -> Result<(), StoreError> {
        self.with_conn_sync(|conn| {
            let current = get_meta(conn, "vector_dims")?
                .and_then(|v| v.parse::<usize>().ok());
            if let Some(existing) = current {
                if existing != dims {
                    warn!(
                        old_dims = existing,
                        new_dims = dims,
                        "embedding dimension changed; dropping vector tables (embeddings will be rebuilt)"
                    );
                    conn.execute_batch(
                        "DROP TABLE IF EXISTS knowledge_vec;
                         DROP TABLE IF EXISTS tg_messages_vec;
                         DROP TABLE IF EXISTS tool_index_vec;
                         UPDATE knowledge SET embedding = NULL;
                         UPDATE tg_messages SET embedding = NULL;
                         UPDATE tool_index SET embedded = 0;",
                    )?;
                }
            }
            for table in ["knowledge_vec", "tg_messages_vec", "tool_index_vec"] {
                conn.execute(
                    &format!(
                        "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING vec0(embedding float[{}] distance_metric=cosine)",
                        table, dims
                    ),
                    [],
                )?;
            }
            set_meta(conn, "vector_dims", &dims.to_string())
        })
    }

    /// Handle for tool executors: read-write, but ATTACH/DETACH are blocked.
    pub fn executor_handle(&self) -> StoreHandle {
        StoreHandle {
            store: self.clone(),
        }
    }
}

pub(crate) fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
    let mut stmt = conn.prepare_cached("SELECT value FROM meta WHERE key = ?1")?;
    let mut rows = stmt.query([key])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

pub(crate) fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO meta (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )?;
    stmt.execute(rusqlite::params![key, value, now_millis()])?;
    Ok(())
}

/// Store proxy handed to tool executors. Forwards arbitrary SQL but refuses
/// `ATTACH`/`DETACH` fragments; results come back as JSON rows.
#[derive(Clone)]
pub struct StoreHandle {
    store: Store,
}

impl StoreHandle {
    fn check_sql(sql: &str) -> Result<(), StoreError> {
        let upper = sql.to_uppercase();
        for banned in ["ATTACH", "DETACH"] {
            // Word-boundary check: the fragment must not appear as a keyword.
            let mut start = 0;
            while let Some(pos) = upper[start..].find(banned) {
                let abs = start + pos;
                let before_ok = abs == 0
                    || !upper.as_bytes()[abs - 1].is_ascii_alphanumeric();
                let after = abs + banned.len();
                let after_ok = after >= upper.len()
                    || !upper.as_bytes()[after].is_ascii_alphanumeric();
                if before_ok && after_ok {
                    return Err(StoreError::BlockedStatement(banned.to_lowercase()));
                }
                start = after;
            }
        }
        Ok(())
    }

    fn bind_params(params: &[serde_json::Value]) -> Vec<Box<dyn rusqlite::ToSql>> {
        params
            .iter()
            .map(|v| -> Box<dyn rusqlite::ToSql> {
                match v {
                    serde_json::Value::Null => Box::new(Option::<String>::None),
                    serde_json::Value::Bool(b) => Box::new(*b as i64),
                    serde_json::Value::Number(n) => {
                        if let Some(i) = n.as_i64() {
                            Box::new(i)
                        } else {
                            Box::new(n.as_f64().unwrap_or(0.0))
                        }
                    }
                    other => Box::new(other.as_str().map(String::from).unwrap_or_else(|| other.to_string())),
                }
            })
            .collect()
    }

    /// Runs a statement; returns affected row count.
    pub async fn execute(
        &self,
        sql: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<usize, StoreError> {
        Self::check_sql(sql)?;
        let sql = sql.to_string();
        self.store
            .with_conn(move |conn| {
                let bound = Self::bind_params(&params);
                let refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
                let mut stmt = conn.prepare_cached(&sql)?;
                Ok(stmt.execute(refs.as_slice())?)
            })
            .await
    }

    /// Runs a query; returns rows as JSON objects keyed by column name.
    pub async fn query(
        &self,
        sql: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        Self::check_sql(sql)?;
        let sql = sql.to_string();
        self.store
            .with_conn(move |conn| {
                let bound = Self::bind_params(&params);
                let refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
                let mut stmt = conn.prepare_cached(&sql)?;
                let names: Vec<String> =
                    stmt.column_names().iter().map(|s| s.to_string()).collect();
                let mut rows = stmt.query(refs.as_slice())?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let mut obj = serde_json::Map::new();
                    for (i, name) in names.iter().enumerate() {
                        let value = match row.get_ref(i)? {
                            rusqlite::types::ValueRef::Null => serde_json::Value::Null,
                            rusqlite::types::ValueRef::Integer(n) => serde_json::json!(n),
                            rusqlite::types::ValueRef::Real(f) => serde_json::json!(f),
                            rusqlite::types::ValueRef::Text(t) => {
                                serde_json::json!(String::from_utf8_lossy(t))
                            }
                            rusqlite::types::ValueRef::Blob(b) => {
                                serde_json::json!(hex::encode(b))
                            }
                        };
                        obj.insert(name.clone(), value);
                    }
                    out.push(serde_json::Value::Object(obj));
                }
                Ok(out)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trip() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(blob_to_vector(&vector_to_blob(&v)), v);
    }

    #[test]
    fn handle_blocks_attach_detach() {
        assert!(StoreHandle::check_sql("ATTACH DATABASE 'x' AS y").is_err());
        assert!(StoreHandle::check_sql("detach database y").is_err());
        // Substring inside an identifier is fine.
        assert!(StoreHandle::check_sql("SELECT attachment FROM files").is_ok());
    }

    #[tokio::test]
    async fn meta_round_trip() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        store.set_meta("flag", "on").await.unwrap();
        assert_eq!(store.get_meta("flag").await.unwrap().as_deref(), Some("on"));
        assert_eq!(store.get_meta("missing").await.unwrap(), None);
    }
}
