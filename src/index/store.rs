//! SQLite-backed index of the remote tree with full-text search.
//!
//! The store persists collections, directories, and files, plus an FTS5
//! virtual table kept in lockstep with the files table through triggers
//! (see `migrations/`). All file mutation goes through a single
//! delete-then-batch-insert transaction per directory, so a crawl can
//! never leave a directory half-updated.

use std::path::Path;

use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use thiserror::Error;
use tracing::{debug, instrument};

/// Maximum connections in the pool. Kept low: SQLite uses file locking.
const MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in milliseconds.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Default result limit for searches.
const DEFAULT_SEARCH_LIMIT: i64 = 50;

/// Index store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Creating the database directory failed.
    #[error("creating database directory: {0}")]
    CreateDir(#[from] std::io::Error),

    /// Connection or query failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failure.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// A top-level remote collection.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Collection {
    /// Stable numeric ID.
    pub id: i64,
    /// Collection name (unique natural key).
    pub name: String,
    /// Remote path, slash-terminated.
    pub path: String,
    /// Human-readable description, possibly empty.
    pub description: String,
}

/// An indexed file as stored.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FileRecord {
    /// Stable numeric ID.
    pub id: i64,
    /// File name.
    pub name: String,
    /// Remote path relative to the server base.
    pub path: String,
    /// Absolute download URL.
    pub url: String,
    /// Size display string as listed.
    pub size: String,
    /// Date display string as listed.
    pub date: String,
    /// Owning directory.
    pub directory_id: i64,
    /// Owning collection.
    pub collection_id: i64,
}

/// A file to be inserted during a crawl (no ID yet).
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    /// File name.
    pub name: String,
    /// Remote path relative to the server base.
    pub path: String,
    /// Absolute download URL.
    pub url: String,
    /// Size display string.
    pub size: String,
    /// Date display string.
    pub date: String,
    /// Owning directory.
    pub directory_id: i64,
    /// Owning collection.
    pub collection_id: i64,
}

/// A search hit: a file joined with its collection name for display.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SearchResult {
    /// File ID.
    pub id: i64,
    /// File name.
    pub name: String,
    /// Remote path.
    pub path: String,
    /// Absolute download URL.
    pub url: String,
    /// Size display string.
    pub size: String,
    /// Date display string.
    pub date: String,
    /// Owning directory.
    pub directory_id: i64,
    /// Owning collection.
    pub collection_id: i64,
    /// Denormalized collection name (empty when unknown).
    pub collection_name: String,
}

/// Index-wide counts.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IndexStats {
    /// Number of collections.
    pub collections: i64,
    /// Number of directories.
    pub directories: i64,
    /// Number of files.
    pub files: i64,
}

/// Escapes user input into a safe FTS5 MATCH expression.
///
/// Each whitespace-separated token is stripped of FTS5 operator
/// characters, has embedded double quotes doubled, and is wrapped in
/// double quotes as a literal phrase. Quoted tokens combine with FTS5's
/// implicit AND, so `mario (usa)` becomes `"mario" "usa"`. Returns an
/// empty string when nothing searchable remains.
#[must_use]
pub fn sanitize_fts_query(query: &str) -> String {
    let mut quoted = Vec::new();
    for word in query.split_whitespace() {
        let escaped = word.replace('"', "\"\"");
        let stripped: String = escaped
            .chars()
            .filter(|c| !matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '^'))
            .collect();
        if stripped.is_empty() {
            continue;
        }
        quoted.push(format!("\"{stripped}\""));
    }
    quoted.join(" ")
}

/// Persistent index store.
#[derive(Debug, Clone)]
pub struct IndexStore {
    pool: SqlitePool,
}

impl IndexStore {
    /// Opens (or creates) the database at the given path and migrates it.
    ///
    /// Enables WAL mode and a busy timeout so a crawler writer and UI
    /// readers can share the file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory cannot be created, the
    /// connection fails, or migrations fail.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory store for tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the connection or migrations fail.
    #[instrument]
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Gracefully closes the pool.
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Inserts or updates a collection by name, returning its stable ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    #[instrument(skip(self, description))]
    pub async fn upsert_collection(
        &self,
        name: &str,
        path: &str,
        description: &str,
    ) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r"INSERT INTO collections (name, path, description) VALUES (?, ?, ?)
              ON CONFLICT(name) DO UPDATE SET path = excluded.path, description = excluded.description
              RETURNING id",
        )
        .bind(name)
        .bind(path)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Returns all collections ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn get_collections(&self) -> Result<Vec<Collection>, StoreError> {
        let collections = sqlx::query_as(
            "SELECT id, name, path, description FROM collections ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(collections)
    }

    /// Inserts or updates a directory by path, returning its stable ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    #[instrument(skip(self))]
    pub async fn upsert_directory(&self, path: &str, collection_id: i64) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r"INSERT INTO directories (path, collection_id) VALUES (?, ?)
              ON CONFLICT(path) DO UPDATE SET collection_id = excluded.collection_id
              RETURNING id",
        )
        .bind(path)
        .bind(collection_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Updates a directory's `last_crawled` timestamp to now.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    #[instrument(skip(self))]
    pub async fn mark_directory_crawled(&self, dir_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE directories SET last_crawled = datetime('now') WHERE id = ?")
            .bind(dir_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns whether a directory needs re-crawling.
    ///
    /// Unknown paths and directories never crawled are stale.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    #[instrument(skip(self))]
    pub async fn is_directory_stale(&self, path: &str, stale_days: i64) -> Result<bool, StoreError> {
        let row: Option<bool> = sqlx::query_scalar(
            r"SELECT last_crawled IS NULL
                     OR last_crawled <= datetime('now', ?)
              FROM directories WHERE path = ?",
        )
        .bind(format!("-{stale_days} days"))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.unwrap_or(true))
    }

    /// Deletes all file rows for a directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    #[instrument(skip(self))]
    pub async fn clear_directory_files(&self, dir_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM files WHERE directory_id = ?")
            .bind(dir_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Inserts files in a single transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure; nothing is
    /// inserted on failure.
    #[instrument(skip(self, files), fields(count = files.len()))]
    pub async fn insert_file_batch(&self, files: &[NewFileRecord]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        insert_files(&mut tx, files).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Replaces a directory's files in one atomic unit.
    ///
    /// Deletes the existing rows and inserts the new snapshot inside a
    /// single transaction. This is the crawler's only file-mutation path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure; the previous
    /// snapshot is preserved on failure.
    #[instrument(skip(self, files), fields(count = files.len()))]
    pub async fn replace_directory_files(
        &self,
        dir_id: i64,
        files: &[NewFileRecord],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM files WHERE directory_id = ?")
            .bind(dir_id)
            .execute(&mut *tx)
            .await?;
        insert_files(&mut tx, files).await?;
        tx.commit().await?;
        debug!(dir_id, files = files.len(), "replaced directory files");
        Ok(())
    }

    /// Full-text search across all indexed files, ranked by relevance.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str, limit: i64) -> Result<Vec<SearchResult>, StoreError> {
        self.search_inner(query, None, limit).await
    }

    /// Full-text search restricted to collections whose name contains
    /// `collection` as a substring.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    #[instrument(skip(self))]
    pub async fn search_in_collection(
        &self,
        query: &str,
        collection: &str,
        limit: i64,
    ) -> Result<Vec<SearchResult>, StoreError> {
        self.search_inner(query, Some(collection), limit).await
    }

    async fn search_inner(
        &self,
        query: &str,
        collection: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let limit = if limit > 0 { limit } else { DEFAULT_SEARCH_LIMIT };
        let sanitized = sanitize_fts_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }

        let results = if let Some(collection) = collection {
            sqlx::query_as(
                r"SELECT f.id, f.name, f.path, f.url, f.size, f.date,
                         f.directory_id, f.collection_id,
                         COALESCE(c.name, '') AS collection_name
                  FROM files_fts fts
                  JOIN files f ON f.id = fts.rowid
                  LEFT JOIN collections c ON c.id = f.collection_id
                  WHERE files_fts MATCH ?
                    AND c.name LIKE ?
                  ORDER BY rank
                  LIMIT ?",
            )
            .bind(&sanitized)
            .bind(format!("%{collection}%"))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(
                r"SELECT f.id, f.name, f.path, f.url, f.size, f.date,
                         f.directory_id, f.collection_id,
                         COALESCE(c.name, '') AS collection_name
                  FROM files_fts fts
                  JOIN files f ON f.id = fts.rowid
                  LEFT JOIN collections c ON c.id = f.collection_id
                  WHERE files_fts MATCH ?
                  ORDER BY rank
                  LIMIT ?",
            )
            .bind(&sanitized)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(results)
    }

    /// Returns index-wide counts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<IndexStats, StoreError> {
        let collections: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collections")
            .fetch_one(&self.pool)
            .await?;
        let directories: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM directories")
            .fetch_one(&self.pool)
            .await?;
        let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        Ok(IndexStats {
            collections,
            directories,
            files,
        })
    }

    /// Returns the number of files indexed for one directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn directory_file_count(&self, dir_id: i64) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE directory_id = ?")
            .bind(dir_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

async fn insert_files(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    files: &[NewFileRecord],
) -> Result<(), sqlx::Error> {
    for f in files {
        sqlx::query(
            r"INSERT INTO files (name, path, url, size, date, directory_id, collection_id)
              VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&f.name)
        .bind(&f.path)
        .bind(&f.url)
        .bind(&f.size)
        .bind(&f.date)
        .bind(f.directory_id)
        .bind(f.collection_id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
