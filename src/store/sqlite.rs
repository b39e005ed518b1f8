//! SQLite Blob 存储（rusqlite，同步调用经 spawn_blocking 执行）

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::store::blob::{BlobError, BlobStore};

#[derive(Clone)]
pub struct SqliteBlobStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SqliteBlobStore")
    }
}

fn io(e: impl std::fmt::Display) -> BlobError {
    BlobError::Io(e.to_string())
}

impl SqliteBlobStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BlobError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        Self::init(Connection::open(path).map_err(io)?)
    }

    pub fn open_in_memory() -> Result<Self, BlobError> {
        Self::init(Connection::open_in_memory().map_err(io)?)
    }

    fn init(conn: Connection) -> Result<Self, BlobError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS blobs (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );",
        )
        .map_err(io)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, BlobError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, BlobError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| io("sqlite connection lock poisoned"))?;
            f(&guard)
        })
        .await
        .map_err(io)?
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT value FROM blobs WHERE key = ?1", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()
            .map_err(io)?
            .ok_or(BlobError::NotFound(key))
        })
        .await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), BlobError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO blobs (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value],
            )
            .map(|_| ())
            .map_err(io)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM blobs WHERE key = ?1", params![key])
                .map(|_| ())
                .map_err(io)
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        let prefix = prefix.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT key FROM blobs ORDER BY key")
                .map_err(io)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(io)?;
            let mut keys = Vec::new();
            for key in rows {
                let key = key.map_err(io)?;
                if key.starts_with(&prefix) {
                    keys.push(key);
                }
            }
            Ok(keys)
        })
        .await
    }
}
