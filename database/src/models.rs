use chrono::{DateTime, Utc};
use redwatch_core::{Comment, Post, SubredditInfo};
use serde::Serialize;
use sqlx::FromRow;

/// Stored subreddit metadata. `name` is the case-folded unique key.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SubredditRow {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub subscribers: i64,
    pub over18: bool,
    pub reddit_created_utc: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubredditRow {
    pub fn to_info(&self) -> SubredditInfo {
        SubredditInfo {
            name: self.name.clone(),
            display_name: self.display_name.clone(),
            title: self.title.clone().unwrap_or_default(),
            description: self.description.clone().unwrap_or_default(),
            subscribers: self.subscribers,
            created_utc: self.reddit_created_utc,
            over18: self.over18,
        }
    }
}

/// Stored submission. `reddit_id` is globally unique;
/// `reddit_created_utc` is immutable after first insert while `score`,
/// `num_comments` and `fetched_at` track the latest fetch.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PostRow {
    pub id: i64,
    pub reddit_id: String,
    pub subreddit_id: i64,
    pub title: String,
    pub selftext: Option<String>,
    pub author: String,
    pub score: i64,
    pub num_comments: i64,
    pub url: String,
    pub permalink: String,
    pub is_self: bool,
    pub reddit_created_utc: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PostRow {
    pub fn to_post(&self, subreddit: &str) -> Post {
        Post {
            id: self.reddit_id.clone(),
            title: self.title.clone(),
            selftext: self.selftext.clone().unwrap_or_default(),
            author: self.author.clone(),
            subreddit: subreddit.to_string(),
            score: self.score,
            num_comments: self.num_comments,
            created_utc: self.reddit_created_utc,
            url: self.url.clone(),
            permalink: self.permalink.clone(),
            is_self: self.is_self,
        }
    }
}

/// Stored comment. `score` and `fetched_at` are the only volatile fields.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CommentRow {
    pub id: i64,
    pub reddit_id: String,
    pub post_id: i64,
    pub parent_reddit_id: Option<String>,
    pub body: String,
    pub author: String,
    pub score: i64,
    pub reddit_created_utc: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommentRow {
    pub fn to_comment(&self, subreddit: &str, post_reddit_id: &str) -> Comment {
        Comment {
            id: self.reddit_id.clone(),
            body: self.body.clone(),
            author: self.author.clone(),
            subreddit: subreddit.to_string(),
            score: self.score,
            created_utc: self.reddit_created_utc,
            parent_id: self.parent_reddit_id.clone(),
            post_id: post_reddit_id.to_string(),
        }
    }
}
