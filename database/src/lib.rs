pub mod models;
pub mod repository;

pub use models::{CommentRow, PostRow, SubredditRow};
pub use repository::{CommentRepository, PostRepository, SubredditRepository};

use redwatch_core::CoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

/// SQLite-backed store shared by the repositories.
///
/// The pool is cheap to clone; every pipeline call checks a connection out
/// of it and returns it when the statement completes, so sessions are never
/// shared across tasks.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database at `url` and bootstrap the
    /// schema. `url` is a sqlx SQLite URL, e.g. `sqlite://redwatch.db`.
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(CoreError::Database)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;

        info!(url, "database connected");
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn init_schema(&self) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subreddits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                title TEXT,
                description TEXT,
                subscribers INTEGER NOT NULL DEFAULT 0,
                over18 INTEGER NOT NULL DEFAULT 0,
                reddit_created_utc TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                reddit_id TEXT NOT NULL UNIQUE,
                subreddit_id INTEGER NOT NULL REFERENCES subreddits(id),
                title TEXT NOT NULL,
                selftext TEXT,
                author TEXT NOT NULL,
                score INTEGER NOT NULL DEFAULT 0,
                num_comments INTEGER NOT NULL DEFAULT 0,
                url TEXT NOT NULL,
                permalink TEXT NOT NULL,
                is_self INTEGER NOT NULL DEFAULT 1,
                reddit_created_utc TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                reddit_id TEXT NOT NULL UNIQUE,
                post_id INTEGER NOT NULL REFERENCES posts(id),
                parent_reddit_id TEXT,
                body TEXT NOT NULL,
                author TEXT NOT NULL,
                score INTEGER NOT NULL DEFAULT 0,
                reddit_created_utc TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS ix_posts_subreddit_id ON posts(subreddit_id)",
            "CREATE INDEX IF NOT EXISTS ix_posts_fetched_at ON posts(fetched_at)",
            "CREATE INDEX IF NOT EXISTS ix_posts_reddit_created_utc ON posts(reddit_created_utc)",
            "CREATE INDEX IF NOT EXISTS ix_comments_post_id ON comments(post_id)",
            "CREATE INDEX IF NOT EXISTS ix_comments_fetched_at ON comments(fetched_at)",
            "CREATE INDEX IF NOT EXISTS ix_comments_reddit_created_utc ON comments(reddit_created_utc)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::setup_test_db;

    #[tokio::test]
    async fn connect_bootstraps_the_schema() {
        let db = setup_test_db().await;

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ('subreddits', 'posts', 'comments') ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();

        assert_eq!(tables, vec!["comments", "posts", "subreddits"]);
        db.close().await;
    }

    #[tokio::test]
    async fn schema_bootstrap_is_idempotent() {
        let db = setup_test_db().await;
        db.init_schema().await.unwrap();
        db.init_schema().await.unwrap();
        db.close().await;
    }
}
