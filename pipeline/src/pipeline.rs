//! Collection → preprocessing → storage workflow.
//!
//! Filters deleted content, splits new from duplicate external ids, and
//! persists each batch with one upsert, reporting counts instead of raw
//! errors wherever an item-level failure can be tolerated.

use chrono::Utc;
use database::{Database, CommentRepository, PostRepository, SubredditRepository, SubredditRow};
use redwatch_core::{Comment, CoreError, Post, SortOrder, SubredditInfo, TimeFilter};
use reddit_client::UnifiedDataSource;
use serde::Serialize;
use std::collections::HashSet;
use std::ops::Add;
use tracing::{info, warn};

use crate::preprocessor::TextPreprocessor;

/// Outcome counts of one pipeline call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingResult {
    pub total: usize,
    pub new: usize,
    pub duplicates: usize,
    pub filtered: usize,
    pub errors: usize,
}

impl Add for ProcessingResult {
    type Output = ProcessingResult;

    fn add(self, other: ProcessingResult) -> ProcessingResult {
        ProcessingResult {
            total: self.total + other.total,
            new: self.new + other.new,
            duplicates: self.duplicates + other.duplicates,
            filtered: self.filtered + other.filtered,
            errors: self.errors + other.errors,
        }
    }
}

/// Result of a full `collect_and_store` pass over one subreddit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionOutcome {
    pub subreddit: String,
    pub posts: ProcessingResult,
    pub comments: Option<ProcessingResult>,
}

/// The ingestion pipeline: owns short-lived model instances between fetch
/// and upsert, never the storage itself.
#[derive(Debug, Clone)]
pub struct DataPipeline {
    db: Database,
    preprocessor: TextPreprocessor,
}

impl DataPipeline {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            preprocessor: TextPreprocessor::new(),
        }
    }

    pub fn preprocessor(&self) -> &TextPreprocessor {
        &self.preprocessor
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Persist a batch of posts for `subreddit_name`.
    ///
    /// Deletion-marker titles (and deleted self-text bodies) are filtered;
    /// the subreddit row is resolved or stubbed; one upsert stores the
    /// rest. A store-level failure counts every valid item as an error and
    /// propagates.
    pub async fn process_posts(
        &self,
        posts: &[Post],
        subreddit_name: &str,
    ) -> Result<ProcessingResult, CoreError> {
        let mut result = ProcessingResult {
            total: posts.len(),
            ..Default::default()
        };

        if posts.is_empty() {
            return Ok(result);
        }

        let mut valid: Vec<&Post> = Vec::with_capacity(posts.len());
        for post in posts {
            if self.preprocessor.is_deleted_content(&post.title) {
                result.filtered += 1;
                continue;
            }
            if post.is_self && self.preprocessor.is_deleted_content(&post.selftext) {
                result.filtered += 1;
                continue;
            }
            valid.push(post);
        }

        if valid.is_empty() {
            return Ok(result);
        }

        let subreddit = self
            .resolve_subreddit(subreddit_name, valid.first().map(|p| p.subreddit.as_str()))
            .await?;

        let post_repo = PostRepository::new(self.db.pool().clone());
        let mut existing: HashSet<String> = HashSet::new();
        for post in &valid {
            if post_repo.get_by_reddit_id(&post.id).await?.is_some() {
                existing.insert(post.id.clone());
            }
        }

        result.new = valid.iter().filter(|p| !existing.contains(&p.id)).count();
        result.duplicates = valid.len() - result.new;

        let owned: Vec<Post> = valid.iter().map(|p| (*p).clone()).collect();
        if let Err(e) = post_repo.save_many(&owned, subreddit.id).await {
            result.errors = valid.len();
            warn!(subreddit = subreddit_name, error = %e, "post batch failed to persist");
            return Err(e);
        }

        info!(
            subreddit = subreddit_name,
            total = result.total,
            new = result.new,
            duplicates = result.duplicates,
            filtered = result.filtered,
            "processed posts"
        );
        Ok(result)
    }

    /// Persist a batch of comments belonging to `post_reddit_id`.
    ///
    /// Deleted bodies are filtered, as are comments whose author is gone
    /// *and* whose body is blank. When the parent post is unknown nothing
    /// is persisted and every valid item counts as an error; the result is
    /// still returned.
    pub async fn process_comments(
        &self,
        comments: &[Comment],
        post_reddit_id: &str,
    ) -> Result<ProcessingResult, CoreError> {
        let mut result = ProcessingResult {
            total: comments.len(),
            ..Default::default()
        };

        if comments.is_empty() {
            return Ok(result);
        }

        let mut valid: Vec<&Comment> = Vec::with_capacity(comments.len());
        for comment in comments {
            if self.preprocessor.is_deleted_content(&comment.body) {
                result.filtered += 1;
                continue;
            }
            if self.preprocessor.normalize_author(&comment.author).is_none()
                && comment.body.trim().is_empty()
            {
                result.filtered += 1;
                continue;
            }
            valid.push(comment);
        }

        if valid.is_empty() {
            return Ok(result);
        }

        let post_repo = PostRepository::new(self.db.pool().clone());
        let Some(post) = post_repo.get_by_reddit_id(post_reddit_id).await? else {
            warn!(post_reddit_id, "parent post unknown, skipping comment batch");
            result.errors = valid.len();
            return Ok(result);
        };

        let comment_repo = CommentRepository::new(self.db.pool().clone());
        let mut existing: HashSet<String> = HashSet::new();
        for comment in &valid {
            if comment_repo.get_by_reddit_id(&comment.id).await?.is_some() {
                existing.insert(comment.id.clone());
            }
        }

        result.new = valid.iter().filter(|c| !existing.contains(&c.id)).count();
        result.duplicates = valid.len() - result.new;

        let owned: Vec<Comment> = valid.iter().map(|c| (*c).clone()).collect();
        if let Err(e) = comment_repo.save_many(&owned, post.id).await {
            result.errors = valid.len();
            warn!(post_reddit_id, error = %e, "comment batch failed to persist");
            return Err(e);
        }

        info!(
            post_reddit_id,
            total = result.total,
            new = result.new,
            duplicates = result.duplicates,
            filtered = result.filtered,
            "processed comments"
        );
        Ok(result)
    }

    /// Store or refresh subreddit metadata.
    pub async fn ensure_subreddit(&self, info: &SubredditInfo) -> Result<SubredditRow, CoreError> {
        SubredditRepository::new(self.db.pool().clone())
            .get_or_create(info)
            .await
    }

    /// Resolve the subreddit row, stubbing a minimal record when no
    /// metadata has been seen yet.
    async fn resolve_subreddit(
        &self,
        name: &str,
        display_hint: Option<&str>,
    ) -> Result<SubredditRow, CoreError> {
        let repo = SubredditRepository::new(self.db.pool().clone());
        if let Some(existing) = repo.get_by_name(name).await? {
            return Ok(existing);
        }

        let stub = SubredditInfo {
            name: name.to_lowercase(),
            display_name: display_hint.unwrap_or(name).to_string(),
            title: String::new(),
            description: String::new(),
            subscribers: 0,
            created_utc: Utc::now(),
            over18: false,
        };
        repo.get_or_create(&stub).await
    }

    /// Full workflow for one subreddit: metadata → posts by sort →
    /// `process_posts` → optionally per-post comments, aggregated.
    pub async fn collect_and_store(
        &self,
        source: &UnifiedDataSource,
        subreddit: &str,
        sort: SortOrder,
        limit: usize,
        include_comments: bool,
        comment_limit: usize,
        time_filter: TimeFilter,
    ) -> Result<CollectionOutcome, CoreError> {
        let mut outcome = CollectionOutcome {
            subreddit: subreddit.to_string(),
            ..Default::default()
        };

        // Metadata failures are tolerated; collection continues.
        match source.get_subreddit_info(subreddit).await {
            Ok(Some(info)) => {
                self.ensure_subreddit(&info).await?;
                info!(subreddit, "stored subreddit metadata");
            }
            Ok(None) => {}
            Err(e) => warn!(subreddit, error = %e, "failed to fetch subreddit metadata"),
        }

        let posts = match sort {
            SortOrder::Hot => source.get_hot_posts(subreddit, limit).await?,
            SortOrder::New => source.get_new_posts(subreddit, limit).await?,
            SortOrder::Top => source.get_top_posts(subreddit, time_filter, limit).await?,
            SortOrder::Rising => source.get_rising_posts(subreddit, limit).await?,
        };
        info!(subreddit, sort = %sort, count = posts.len(), "collected posts");

        outcome.posts = self.process_posts(&posts, subreddit).await?;

        if include_comments && !posts.is_empty() {
            let mut totals = ProcessingResult::default();
            for post in &posts {
                match source.get_post_comments(&post.id, comment_limit).await {
                    Ok(comments) => match self.process_comments(&comments, &post.id).await {
                        Ok(result) => totals = totals + result,
                        Err(e) => {
                            warn!(post_id = %post.id, error = %e, "comment processing failed");
                            totals.errors += 1;
                        }
                    },
                    Err(e) => {
                        warn!(post_id = %post.id, error = %e, "comment collection failed");
                        totals.errors += 1;
                    }
                }
            }
            info!(
                subreddit,
                new = totals.new,
                duplicates = totals.duplicates,
                "collected comments"
            );
            outcome.comments = Some(totals);
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use database::Database;
    use std::env;

    async fn test_db() -> Database {
        let path = env::temp_dir().join(format!("redwatch_pipeline_{}.db", uuid::Uuid::new_v4()));
        Database::connect(&format!("sqlite://{}", path.display()))
            .await
            .expect("test database")
    }

    fn post(id: &str) -> Post {
        Post {
            id: id.to_string(),
            title: format!("title {id}"),
            selftext: "text".to_string(),
            author: "author".to_string(),
            subreddit: "Python".to_string(),
            score: 10,
            num_comments: 2,
            created_utc: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            url: format!("https://example.com/{id}"),
            permalink: format!("https://reddit.com/r/python/comments/{id}/"),
            is_self: true,
        }
    }

    fn comment(id: &str, author: &str, body: &str) -> Comment {
        Comment {
            id: id.to_string(),
            body: body.to_string(),
            author: author.to_string(),
            subreddit: "Python".to_string(),
            score: 1,
            created_utc: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            parent_id: Some("t3_p1".to_string()),
            post_id: "p1".to_string(),
        }
    }

    #[tokio::test]
    async fn empty_input_short_circuits_without_writes() {
        let db = test_db().await;
        let pipeline = DataPipeline::new(db.clone());

        let result = pipeline.process_posts(&[], "python").await.unwrap();
        assert_eq!(result, ProcessingResult::default());

        // No stub subreddit row may appear for an empty batch.
        let repo = SubredditRepository::new(db.pool().clone());
        assert!(repo.get_by_name("python").await.unwrap().is_none());
        db.close().await;
    }

    #[tokio::test]
    async fn first_pass_is_new_second_pass_is_duplicates() {
        let db = test_db().await;
        let pipeline = DataPipeline::new(db.clone());
        let batch = vec![post("a"), post("b"), post("c")];

        let first = pipeline.process_posts(&batch, "python").await.unwrap();
        assert_eq!(first.new, 3);
        assert_eq!(first.duplicates, 0);

        let second = pipeline.process_posts(&batch, "python").await.unwrap();
        assert_eq!(second.new, 0);
        assert_eq!(second.duplicates, 3);
        assert_eq!(second.total, 3);
        db.close().await;
    }

    #[tokio::test]
    async fn deleted_posts_are_filtered_not_stored() {
        let db = test_db().await;
        let pipeline = DataPipeline::new(db.clone());

        let mut deleted_title = post("x");
        deleted_title.title = "[deleted]".to_string();
        let mut deleted_body = post("y");
        deleted_body.selftext = "[removed]".to_string();

        let result = pipeline
            .process_posts(&[deleted_title, deleted_body, post("z")], "python")
            .await
            .unwrap();
        assert_eq!(result.filtered, 2);
        assert_eq!(result.new, 1);

        let posts = PostRepository::new(db.pool().clone());
        assert!(posts.get_by_reddit_id("x").await.unwrap().is_none());
        assert!(posts.get_by_reddit_id("z").await.unwrap().is_some());
        db.close().await;
    }

    #[tokio::test]
    async fn posts_create_a_stub_subreddit_row_when_unknown() {
        let db = test_db().await;
        let pipeline = DataPipeline::new(db.clone());

        pipeline.process_posts(&[post("a")], "python").await.unwrap();

        let repo = SubredditRepository::new(db.pool().clone());
        let row = repo.get_by_name("python").await.unwrap().unwrap();
        assert_eq!(row.display_name, "Python");
        assert_eq!(row.subscribers, 0);
        db.close().await;
    }

    #[tokio::test]
    async fn comments_with_unknown_parent_count_as_errors() {
        let db = test_db().await;
        let pipeline = DataPipeline::new(db.clone());

        let result = pipeline
            .process_comments(&[comment("c1", "user", "hello")], "nope")
            .await
            .unwrap();
        assert_eq!(result.errors, 1);
        assert_eq!(result.new, 0);
        db.close().await;
    }

    #[tokio::test]
    async fn comment_filtering_drops_deleted_and_authorless_blank() {
        let db = test_db().await;
        let pipeline = DataPipeline::new(db.clone());

        // Parent must exist for the valid comment to persist.
        pipeline.process_posts(&[post("p1")], "python").await.unwrap();

        let batch = vec![
            comment("c1", "user", "fine"),
            comment("c2", "user", "[deleted]"),
            comment("c3", "[deleted]", "  "),
            comment("c4", "[deleted]", "body survives author deletion"),
        ];
        let result = pipeline.process_comments(&batch, "p1").await.unwrap();
        assert_eq!(result.filtered, 2);
        assert_eq!(result.new, 2);

        let comments = CommentRepository::new(db.pool().clone());
        assert!(comments.get_by_reddit_id("c4").await.unwrap().is_some());
        assert!(comments.get_by_reddit_id("c3").await.unwrap().is_none());
        db.close().await;
    }
}
