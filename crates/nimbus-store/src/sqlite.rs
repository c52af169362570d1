//! SQLite-backed cache store.
//!
//! Buckets and entries survive restarts. Entry order comes from an
//! autoincrement sequence: an overwrite deletes and re-inserts the row, so the
//! rewritten key becomes the newest.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use nimbus_net::ResponseType;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::{CacheError, CacheStore, RequestKey, StoredResponse};

/// Database schema version for migrations
const SCHEMA_VERSION: i32 = 1;

const ENTRY_COLUMNS: &str =
    "e.response_url, e.status, e.status_text, e.headers, e.response_type, e.body, e.cached_at";

/// Cache store persisted in a SQLite database.
#[derive(Clone)]
pub struct SqliteCacheStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCacheStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened cache database");
        Self::from_connection(conn)
    }

    /// Database that lives as long as the store.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CacheError> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let table_exists: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
                [],
                |row| row.get::<_, i32>(0).map(|count| count > 0),
            )
            .unwrap_or(false);

        let version: i32 = if table_exists {
            conn.query_row(
                "SELECT version FROM schema_version ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0)
        } else {
            0
        };

        if version < SCHEMA_VERSION {
            create_schema_v1(&conn)?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        F: FnOnce(&mut Connection) -> Result<T, CacheError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut guard)
        })
        .await
        .map_err(|e| CacheError::Internal(format!("blocking task failed: {}", e)))?
    }
}

fn create_schema_v1(conn: &Connection) -> Result<(), CacheError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version INTEGER NOT NULL,
            applied_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS buckets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entries (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            bucket_id INTEGER NOT NULL REFERENCES buckets(id) ON DELETE CASCADE,
            method TEXT NOT NULL,
            url TEXT NOT NULL,
            response_url TEXT NOT NULL,
            status INTEGER NOT NULL,
            status_text TEXT NOT NULL,
            headers TEXT NOT NULL,
            response_type TEXT NOT NULL,
            body BLOB NOT NULL,
            cached_at INTEGER NOT NULL,
            UNIQUE (bucket_id, method, url)
        );

        CREATE INDEX IF NOT EXISTS idx_entries_bucket ON entries(bucket_id, seq);
        "#,
    )?;

    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
        params![SCHEMA_VERSION, Utc::now().timestamp()],
    )?;

    debug!(version = SCHEMA_VERSION, "Created cache schema");
    Ok(())
}

fn bucket_id(conn: &Connection, name: &str) -> Result<Option<i64>, CacheError> {
    Ok(conn
        .query_row("SELECT id FROM buckets WHERE name = ?", params![name], |row| {
            row.get(0)
        })
        .optional()?)
}

fn ensure_bucket(conn: &Connection, name: &str) -> Result<i64, CacheError> {
    conn.execute(
        "INSERT OR IGNORE INTO buckets (name, created_at) VALUES (?, ?)",
        params![name, Utc::now().timestamp_millis()],
    )?;
    bucket_id(conn, name)?
        .ok_or_else(|| CacheError::Internal(format!("bucket '{}' vanished after insert", name)))
}

fn insert_entry(
    conn: &Connection,
    bucket: i64,
    key: &RequestKey,
    response: &StoredResponse,
) -> Result<(), CacheError> {
    conn.execute(
        "DELETE FROM entries WHERE bucket_id = ? AND method = ? AND url = ?",
        params![bucket, key.method(), key.url()],
    )?;
    conn.execute(
        "INSERT INTO entries (bucket_id, method, url, response_url, status, status_text, \
         headers, response_type, body, cached_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            bucket,
            key.method(),
            key.url(),
            response.url,
            i64::from(response.status),
            response.status_text,
            serde_json::to_string(&response.headers)?,
            response.response_type.as_str(),
            response.body,
            response.cached_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

/// Row as read from `entries`, before validation.
struct RawEntry {
    url: String,
    status: i64,
    status_text: String,
    headers: String,
    response_type: String,
    body: Vec<u8>,
    cached_at: i64,
}

impl RawEntry {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            url: row.get(0)?,
            status: row.get(1)?,
            status_text: row.get(2)?,
            headers: row.get(3)?,
            response_type: row.get(4)?,
            body: row.get(5)?,
            cached_at: row.get(6)?,
        })
    }

    fn into_stored(self) -> Result<StoredResponse, CacheError> {
        let status = u16::try_from(self.status)
            .map_err(|_| CacheError::Corrupt(format!("status {}", self.status)))?;
        let response_type = ResponseType::parse(&self.response_type)
            .ok_or_else(|| CacheError::Corrupt(format!("response type '{}'", self.response_type)))?;
        let cached_at = Utc
            .timestamp_millis_opt(self.cached_at)
            .single()
            .ok_or_else(|| CacheError::Corrupt(format!("timestamp {}", self.cached_at)))?;

        Ok(StoredResponse {
            url: self.url,
            status,
            status_text: self.status_text,
            headers: serde_json::from_str(&self.headers)?,
            response_type,
            body: self.body,
            cached_at,
        })
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn open(&self, bucket: &str) -> Result<(), CacheError> {
        let name = bucket.to_string();
        self.with_conn(move |conn| ensure_bucket(conn, &name).map(|_| ()))
            .await
    }

    async fn has(&self, bucket: &str) -> Result<bool, CacheError> {
        let name = bucket.to_string();
        self.with_conn(move |conn| Ok(bucket_id(conn, &name)?.is_some()))
            .await
    }

    async fn bucket_names(&self) -> Result<Vec<String>, CacheError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM buckets ORDER BY id")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(names)
        })
        .await
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<bool, CacheError> {
        let name = bucket.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM buckets WHERE name = ?", params![name])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn match_in(
        &self,
        bucket: &str,
        key: &RequestKey,
    ) -> Result<Option<StoredResponse>, CacheError> {
        let name = bucket.to_string();
        let key = key.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM entries e JOIN buckets b ON e.bucket_id = b.id \
                 WHERE b.name = ? AND e.method = ? AND e.url = ?",
                ENTRY_COLUMNS
            );
            conn.query_row(&sql, params![name, key.method(), key.url()], RawEntry::from_row)
                .optional()?
                .map(RawEntry::into_stored)
                .transpose()
        })
        .await
    }

    async fn match_any(&self, key: &RequestKey) -> Result<Option<StoredResponse>, CacheError> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM entries e JOIN buckets b ON e.bucket_id = b.id \
                 WHERE e.method = ? AND e.url = ? ORDER BY b.id LIMIT 1",
                ENTRY_COLUMNS
            );
            conn.query_row(&sql, params![key.method(), key.url()], RawEntry::from_row)
                .optional()?
                .map(RawEntry::into_stored)
                .transpose()
        })
        .await
    }

    async fn put(
        &self,
        bucket: &str,
        key: RequestKey,
        response: StoredResponse,
    ) -> Result<(), CacheError> {
        self.put_all(bucket, vec![(key, response)]).await
    }

    async fn put_all(
        &self,
        bucket: &str,
        entries: Vec<(RequestKey, StoredResponse)>,
    ) -> Result<(), CacheError> {
        let name = bucket.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let id = ensure_bucket(&tx, &name)?;
            for (key, response) in &entries {
                insert_entry(&tx, id, key, response)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn keys(&self, bucket: &str) -> Result<Vec<RequestKey>, CacheError> {
        let name = bucket.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT e.method, e.url FROM entries e JOIN buckets b ON e.bucket_id = b.id \
                 WHERE b.name = ? ORDER BY e.seq",
            )?;
            let keys = stmt
                .query_map(params![name], |row| {
                    Ok(RequestKey::from_parts(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(keys)
        })
        .await
    }

    async fn delete_entry(&self, bucket: &str, key: &RequestKey) -> Result<bool, CacheError> {
        let name = bucket.to_string();
        let key = key.clone();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM entries WHERE method = ? AND url = ? AND bucket_id = \
                 (SELECT id FROM buckets WHERE name = ?)",
                params![key.method(), key.url(), name],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn len(&self, bucket: &str) -> Result<usize, CacheError> {
        let name = bucket.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM entries e JOIN buckets b ON e.bucket_id = b.id \
                 WHERE b.name = ?",
                params![name],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }
}
