//! SQLite persistence for accepted posts.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use driftnet_common::Post;

use crate::error::Result;

/// Watermark used when a caller supplies no pagination cursor, so the first
/// page is simply "most recent `limit`".
pub const FIRST_PAGE_CURSOR: i64 = 9_999_999_999_999;

/// The store surface consumed by the filter pipeline, the purge loop, and
/// the feed endpoint.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Insert a post. A duplicate rkey is silently absorbed, since the
    /// firehose may redeliver the identical event.
    async fn insert_post(&self, post: &Post) -> Result<()>;

    /// Up to `limit` posts with `created_at` strictly less than `cursor`,
    /// newest first. The next-page cursor is derived by the caller from the
    /// last row returned.
    async fn posts_before(&self, cursor: i64, limit: u32) -> Result<Vec<Post>>;

    /// Remove every post whose author is in the given set. Returns the
    /// number of rows removed.
    async fn delete_by_authors(&self, authors: &HashSet<String>) -> Result<u64>;
}

/// SQLite-backed [`PostStore`].
pub struct FeedStore {
    pool: SqlitePool,
}

impl FeedStore {
    /// Open (creating if needed) the database file and ensure the schema
    /// exists. Failure here is fatal to startup.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// An in-memory database, used by tests.
    pub async fn open_in_memory() -> Result<Self> {
        // A pool of one: each new connection to an in-memory database would
        // see its own empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::new().in_memory(true))
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
                rkey TEXT,
                uri TEXT,
                created_at INTEGER NOT NULL,
                UNIQUE(rkey)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts (created_at)")
            .execute(&self.pool)
            .await?;

        info!("posts table ready");
        Ok(())
    }

    /// Cleanly close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl PostStore for FeedStore {
    async fn insert_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            "INSERT INTO posts (rkey, uri, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(rkey) DO NOTHING",
        )
        .bind(&post.rkey)
        .bind(&post.uri)
        .bind(post.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn posts_before(&self, cursor: i64, limit: u32) -> Result<Vec<Post>> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT rkey, uri, created_at FROM posts \
             WHERE created_at < ? \
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(cursor)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(rkey, uri, created_at)| Post { rkey, uri, created_at })
            .collect())
    }

    async fn delete_by_authors(&self, authors: &HashSet<String>) -> Result<u64> {
        if authors.is_empty() {
            return Ok(0);
        }

        // The schema carries no author column; the author DID is the first
        // segment of the record address.
        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;
        for did in authors {
            let result = sqlx::query("DELETE FROM posts WHERE uri LIKE ?")
                .bind(format!("at://{did}/%"))
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected();
        }
        tx.commit().await?;

        Ok(removed)
    }
}
