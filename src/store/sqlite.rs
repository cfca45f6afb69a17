//! SQLite-backed store. One `documents` table keyed by path with a version
//! column; commit-time validation of the transactional read set runs inside
//! `BEGIN IMMEDIATE` so only one writer resolves conflicts at a time.

use std::path::Path;

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::{
    apply_query, resolve_patch, server_timestamp, CommitOutcome, DocPath, Document, DocumentStore,
    Fields, Query, ReadRecord, StoreResult, Write,
};

pub type DbPool = Pool<SqliteConnectionManager>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        path TEXT PRIMARY KEY,
        collection TEXT NOT NULL,
        fields TEXT NOT NULL,
        version INTEGER NOT NULL,
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
    CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
";

pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder().max_size(8).build(manager)?;

        let conn = pool.get()?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self { pool })
    }

    /// Single-connection in-memory database, for tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        pool.get()?.execute_batch(SCHEMA)?;
        Ok(Self { pool })
    }

    fn load(conn: &Connection, path: &DocPath) -> StoreResult<Option<Document>> {
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT fields, version FROM documents WHERE path = ?1",
                params![path.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((fields_json, version)) => {
                let fields: Fields = serde_json::from_str(&fields_json)?;
                Ok(Some(Document {
                    path: path.clone(),
                    fields,
                    version: version as u64,
                }))
            }
            None => Ok(None),
        }
    }

    fn store_fields(
        conn: &Connection,
        path: &DocPath,
        fields: &Fields,
        version: u64,
    ) -> StoreResult<()> {
        conn.execute(
            "INSERT INTO documents (path, collection, fields, version, updated_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))
             ON CONFLICT(path) DO UPDATE SET
               fields = excluded.fields,
               version = excluded.version,
               updated_at = excluded.updated_at",
            params![
                path.as_str(),
                path.collection(),
                serde_json::to_string(&Value::Object(fields.clone()))?,
                version as i64
            ],
        )?;
        Ok(())
    }

    fn apply_writes(conn: &Connection, writes: &[Write]) -> StoreResult<()> {
        let now = server_timestamp();
        for write in writes {
            match write {
                Write::Set { path, patch } => {
                    let version = Self::load(conn, path)?.map(|d| d.version).unwrap_or(0) + 1;
                    let fields = resolve_patch(None, patch, &now);
                    Self::store_fields(conn, path, &fields, version)?;
                }
                Write::Merge { path, patch } => {
                    let current = Self::load(conn, path)?;
                    let version = current.as_ref().map(|d| d.version).unwrap_or(0) + 1;
                    let fields = resolve_patch(current.as_ref().map(|d| &d.fields), patch, &now);
                    Self::store_fields(conn, path, &fields, version)?;
                }
                Write::Delete { path } => {
                    conn.execute(
                        "DELETE FROM documents WHERE path = ?1",
                        params![path.as_str()],
                    )?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<Document>> {
        let conn = self.pool.get()?;
        Self::load(&conn, path)
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        let conn = self.pool.get()?;

        let mut stmt =
            conn.prepare("SELECT path, fields, version FROM documents WHERE collection = ?1")?;
        let rows: Vec<(String, String, i64)> = stmt
            .query_map(params![query.collection], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut docs = Vec::with_capacity(rows.len());
        for (path, fields_json, version) in rows {
            let fields: Fields = serde_json::from_str(&fields_json)?;
            docs.push(Document {
                path: DocPath::new(path),
                fields,
                version: version as u64,
            });
        }

        Ok(apply_query(docs, query))
    }

    async fn try_commit(
        &self,
        reads: &[ReadRecord],
        writes: &[Write],
    ) -> StoreResult<CommitOutcome> {
        let conn = self.pool.get()?;

        conn.execute_batch("BEGIN IMMEDIATE")?;

        let result: StoreResult<CommitOutcome> = (|| {
            for (path, observed) in reads {
                let current: Option<i64> = conn
                    .query_row(
                        "SELECT version FROM documents WHERE path = ?1",
                        params![path.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?;
                if current.map(|v| v as u64) != *observed {
                    return Ok(CommitOutcome::Conflict);
                }
            }

            Self::apply_writes(&conn, writes)?;
            Ok(CommitOutcome::Committed)
        })();

        match result {
            Ok(CommitOutcome::Committed) => {
                conn.execute_batch("COMMIT")?;
                Ok(CommitOutcome::Committed)
            }
            Ok(CommitOutcome::Conflict) => {
                conn.execute_batch("ROLLBACK")?;
                Ok(CommitOutcome::Conflict)
            }
            Err(e) => {
                conn.execute_batch("ROLLBACK")?;
                Err(e)
            }
        }
    }
}
