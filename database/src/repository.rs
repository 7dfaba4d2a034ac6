//! Per-entity persistence, keyed on the Reddit-side external ids.
//!
//! `save_many` is the hot path: one batched `INSERT ... ON CONFLICT DO
//! UPDATE` per call that only touches the volatile columns, so immutable
//! fields keep their first-seen values no matter how often an item is
//! re-fetched.

use chrono::{DateTime, Duration, Utc};
use redwatch_core::{Comment, CoreError, Post, SubredditInfo};
use sqlx::sqlite::SqlitePool;
use sqlx::QueryBuilder;
use tracing::debug;

use crate::models::{CommentRow, PostRow, SubredditRow};

/// Subreddit metadata access.
#[derive(Debug, Clone)]
pub struct SubredditRepository {
    pool: SqlitePool,
}

impl SubredditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Look a subreddit up by its case-folded name.
    pub async fn get_by_name(&self, name: &str) -> Result<Option<SubredditRow>, CoreError> {
        let row = sqlx::query_as::<_, SubredditRow>("SELECT * FROM subreddits WHERE name = ?")
            .bind(name.to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Create the subreddit on first encounter; update the mutable fields
    /// (last-write-wins) on every later one. `fetched_at` always advances.
    pub async fn get_or_create(&self, info: &SubredditInfo) -> Result<SubredditRow, CoreError> {
        let now = Utc::now();
        let name = info.name.to_lowercase();
        let title = (!info.title.is_empty()).then(|| info.title.clone());
        let description = (!info.description.is_empty()).then(|| info.description.clone());

        if let Some(existing) = self.get_by_name(&name).await? {
            sqlx::query(
                r#"
                UPDATE subreddits
                SET display_name = ?, title = ?, description = ?, subscribers = ?,
                    over18 = ?, fetched_at = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&info.display_name)
            .bind(&title)
            .bind(&description)
            .bind(info.subscribers)
            .bind(info.over18)
            .bind(now)
            .bind(now)
            .bind(existing.id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                INSERT INTO subreddits
                    (name, display_name, title, description, subscribers, over18,
                     reddit_created_utc, fetched_at, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&name)
            .bind(&info.display_name)
            .bind(&title)
            .bind(&description)
            .bind(info.subscribers)
            .bind(info.over18)
            .bind(info.created_utc)
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
        }

        self.get_by_name(&name)
            .await?
            .ok_or_else(|| CoreError::Internal(format!("subreddit {name} vanished after upsert")))
    }

    /// Refresh subscriber counts (and `fetched_at`) without touching the
    /// rest of the record.
    pub async fn update_metrics(
        &self,
        name: &str,
        subscribers: Option<i64>,
    ) -> Result<Option<SubredditRow>, CoreError> {
        let Some(existing) = self.get_by_name(name).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        sqlx::query("UPDATE subreddits SET subscribers = ?, fetched_at = ?, updated_at = ? WHERE id = ?")
            .bind(subscribers.unwrap_or(existing.subscribers))
            .bind(now)
            .bind(now)
            .bind(existing.id)
            .execute(&self.pool)
            .await?;

        self.get_by_name(name).await
    }

    pub async fn list_all(&self, limit: i64) -> Result<Vec<SubredditRow>, CoreError> {
        let rows = sqlx::query_as::<_, SubredditRow>(
            "SELECT * FROM subreddits ORDER BY subscribers DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// Submission access with batched upserts.
#[derive(Debug, Clone)]
pub struct PostRepository {
    pool: SqlitePool,
}

impl PostRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_reddit_id(&self, reddit_id: &str) -> Result<Option<PostRow>, CoreError> {
        let row = sqlx::query_as::<_, PostRow>("SELECT * FROM posts WHERE reddit_id = ?")
            .bind(reddit_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn save(&self, post: &Post, subreddit_id: i64) -> Result<PostRow, CoreError> {
        let saved = self
            .save_many(std::slice::from_ref(post), subreddit_id)
            .await?;
        saved
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Internal(format!("post {} vanished after upsert", post.id)))
    }

    /// Batched upsert keyed on `reddit_id`. Conflicts update only the
    /// volatile columns (score, num_comments, fetched_at). Returns the
    /// stored rows, pre-existing ones included, so callers can report
    /// counts.
    pub async fn save_many(
        &self,
        posts: &[Post],
        subreddit_id: i64,
    ) -> Result<Vec<PostRow>, CoreError> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut qb = QueryBuilder::<sqlx::Sqlite>::new(
            "INSERT INTO posts (reddit_id, subreddit_id, title, selftext, author, score, \
             num_comments, url, permalink, is_self, reddit_created_utc, fetched_at, \
             created_at, updated_at) ",
        );
        qb.push_values(posts, |mut b, post| {
            let selftext = (!post.selftext.is_empty()).then_some(post.selftext.as_str());
            b.push_bind(&post.id)
                .push_bind(subreddit_id)
                .push_bind(&post.title)
                .push_bind(selftext)
                .push_bind(&post.author)
                .push_bind(post.score)
                .push_bind(post.num_comments)
                .push_bind(&post.url)
                .push_bind(&post.permalink)
                .push_bind(post.is_self)
                .push_bind(post.created_utc)
                .push_bind(now)
                .push_bind(now)
                .push_bind(now);
        });
        qb.push(
            " ON CONFLICT(reddit_id) DO UPDATE SET score = excluded.score, \
             num_comments = excluded.num_comments, fetched_at = excluded.fetched_at, \
             updated_at = excluded.updated_at",
        );
        qb.build().execute(&self.pool).await?;

        debug!(count = posts.len(), subreddit_id, "upserted posts");
        self.fetch_by_reddit_ids(posts.iter().map(|p| p.id.as_str()))
            .await
    }

    async fn fetch_by_reddit_ids<'a>(
        &self,
        ids: impl Iterator<Item = &'a str>,
    ) -> Result<Vec<PostRow>, CoreError> {
        let mut qb = QueryBuilder::<sqlx::Sqlite>::new("SELECT * FROM posts WHERE reddit_id IN (");
        {
            let mut separated = qb.separated(", ");
            for id in ids {
                separated.push_bind(id);
            }
        }
        qb.push(")");

        let rows = qb
            .build_query_as::<PostRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn get_by_subreddit(
        &self,
        subreddit_id: i64,
        limit: i64,
    ) -> Result<Vec<PostRow>, CoreError> {
        let rows = sqlx::query_as::<_, PostRow>(
            "SELECT * FROM posts WHERE subreddit_id = ? ORDER BY reddit_created_utc DESC LIMIT ?",
        )
        .bind(subreddit_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_recent(&self, hours: i64, limit: i64) -> Result<Vec<PostRow>, CoreError> {
        let cutoff: DateTime<Utc> = Utc::now() - Duration::hours(hours);
        let rows = sqlx::query_as::<_, PostRow>(
            "SELECT * FROM posts WHERE reddit_created_utc >= ? ORDER BY reddit_created_utc DESC LIMIT ?",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// Comment access with batched upserts.
#[derive(Debug, Clone)]
pub struct CommentRepository {
    pool: SqlitePool,
}

impl CommentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_reddit_id(
        &self,
        reddit_id: &str,
    ) -> Result<Option<CommentRow>, CoreError> {
        let row = sqlx::query_as::<_, CommentRow>("SELECT * FROM comments WHERE reddit_id = ?")
            .bind(reddit_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn save(&self, comment: &Comment, post_id: i64) -> Result<CommentRow, CoreError> {
        let saved = self
            .save_many(std::slice::from_ref(comment), post_id)
            .await?;
        saved.into_iter().next().ok_or_else(|| {
            CoreError::Internal(format!("comment {} vanished after upsert", comment.id))
        })
    }

    /// Batched upsert keyed on `reddit_id`; conflicts update score and
    /// fetched_at only (body and author never change).
    pub async fn save_many(
        &self,
        comments: &[Comment],
        post_id: i64,
    ) -> Result<Vec<CommentRow>, CoreError> {
        if comments.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut qb = QueryBuilder::<sqlx::Sqlite>::new(
            "INSERT INTO comments (reddit_id, post_id, parent_reddit_id, body, author, score, \
             reddit_created_utc, fetched_at, created_at, updated_at) ",
        );
        qb.push_values(comments, |mut b, comment| {
            b.push_bind(&comment.id)
                .push_bind(post_id)
                .push_bind(&comment.parent_id)
                .push_bind(&comment.body)
                .push_bind(&comment.author)
                .push_bind(comment.score)
                .push_bind(comment.created_utc)
                .push_bind(now)
                .push_bind(now)
                .push_bind(now);
        });
        qb.push(
            " ON CONFLICT(reddit_id) DO UPDATE SET score = excluded.score, \
             fetched_at = excluded.fetched_at, updated_at = excluded.updated_at",
        );
        qb.build().execute(&self.pool).await?;

        debug!(count = comments.len(), post_id, "upserted comments");

        let mut qb = QueryBuilder::<sqlx::Sqlite>::new("SELECT * FROM comments WHERE reddit_id IN (");
        {
            let mut separated = qb.separated(", ");
            for comment in comments {
                separated.push_bind(&comment.id);
            }
        }
        qb.push(")");

        let rows = qb
            .build_query_as::<CommentRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn get_by_post(&self, post_id: i64) -> Result<Vec<CommentRow>, CoreError> {
        let rows = sqlx::query_as::<_, CommentRow>(
            "SELECT * FROM comments WHERE post_id = ? ORDER BY reddit_created_utc DESC",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
