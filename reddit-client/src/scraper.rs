use async_trait::async_trait;
use redwatch_core::{Comment, CoreError, Post, SubredditInfo, TimeFilter};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::http::ScrapingClient;
use crate::parser;
use crate::source::SourceBackend;

/// Hard per-request caps imposed by the JSON endpoints.
pub const MAX_POSTS_PER_REQUEST: usize = 100;
pub const MAX_COMMENTS_PER_REQUEST: usize = 500;

/// Backend over the public JSON-over-HTTP endpoints.
///
/// URL patterns:
/// - `{base}/r/{subreddit}/{hot,new,top,rising}.json`
/// - `{base}/comments/{post_id}.json`
/// - `{base}/r/{subreddit}/comments.json`
/// - `{base}/r/{subreddit}/about.json`
/// - `{base}/subreddits/search.json`
#[derive(Debug)]
pub struct RedditScraper {
    client: Arc<ScrapingClient>,
    base_url: String,
}

impl RedditScraper {
    pub fn new(client: Arc<ScrapingClient>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn listing_url(&self, subreddit: &str, sort: &str) -> String {
        self.endpoint(&format!("/r/{subreddit}/{sort}.json"))
    }

    /// Collect up to `limit` posts from a listing URL, following the
    /// `after` cursor. A failure on the first page propagates; a failure
    /// mid-pagination returns what was already gathered.
    async fn fetch_posts(
        &self,
        url: &str,
        extra: &[(&str, String)],
        limit: usize,
    ) -> Result<Vec<Post>, CoreError> {
        let mut posts: Vec<Post> = Vec::new();
        let mut after: Option<String> = None;

        while posts.len() < limit {
            let fetch_count = (limit - posts.len()).min(MAX_POSTS_PER_REQUEST);
            let mut params: Vec<(&str, String)> = vec![("limit", fetch_count.to_string())];
            params.extend(extra.iter().cloned());
            if let Some(cursor) = &after {
                params.push(("after", cursor.clone()));
            }

            debug!(url, fetch_count, after = ?after, "fetching posts page");
            let response = match self.client.get_json(url, &params, fetch_count as u32).await {
                Ok(value) => value,
                Err(e) if posts.is_empty() => return Err(e),
                Err(e) => {
                    warn!(url, error = %e, "pagination aborted, returning partial results");
                    break;
                }
            };

            let page = parser::extract_posts(&response);
            after = parser::after_token(&response);

            if page.is_empty() {
                debug!(url, "no more posts available");
                break;
            }
            posts.extend(page);

            if after.is_none() {
                break;
            }
        }

        posts.truncate(limit);
        Ok(posts)
    }

    pub async fn hot(&self, subreddit: &str, limit: usize) -> Result<Vec<Post>, CoreError> {
        self.fetch_posts(&self.listing_url(subreddit, "hot"), &[], limit)
            .await
    }

    pub async fn newest(&self, subreddit: &str, limit: usize) -> Result<Vec<Post>, CoreError> {
        self.fetch_posts(&self.listing_url(subreddit, "new"), &[], limit)
            .await
    }

    pub async fn top(
        &self,
        subreddit: &str,
        time_filter: TimeFilter,
        limit: usize,
    ) -> Result<Vec<Post>, CoreError> {
        let extra = [("t", time_filter.as_str().to_string())];
        self.fetch_posts(&self.listing_url(subreddit, "top"), &extra, limit)
            .await
    }

    pub async fn rising(&self, subreddit: &str, limit: usize) -> Result<Vec<Post>, CoreError> {
        self.fetch_posts(&self.listing_url(subreddit, "rising"), &[], limit)
            .await
    }

    /// Comments of one submission, flattened out of their reply tree.
    pub async fn comments_of_post(
        &self,
        post_id: &str,
        limit: usize,
    ) -> Result<Vec<Comment>, CoreError> {
        let effective_limit = limit.min(MAX_COMMENTS_PER_REQUEST);
        let url = self.endpoint(&format!("/comments/{post_id}.json"));
        let params = [("limit", effective_limit.to_string())];

        debug!(url, "fetching post comments");
        let response = self
            .client
            .get_json(&url, &params, effective_limit as u32)
            .await?;

        let mut comments = parser::extract_comments(&response);
        comments.truncate(limit);
        Ok(comments)
    }

    /// Recent comment stream of a subreddit, paged with `after`.
    pub async fn comment_stream(
        &self,
        subreddit: &str,
        limit: usize,
    ) -> Result<Vec<Comment>, CoreError> {
        let url = self.endpoint(&format!("/r/{subreddit}/comments.json"));
        let mut comments: Vec<Comment> = Vec::new();
        let mut after: Option<String> = None;

        while comments.len() < limit {
            let fetch_count = (limit - comments.len()).min(MAX_POSTS_PER_REQUEST);
            let mut params: Vec<(&str, String)> = vec![("limit", fetch_count.to_string())];
            if let Some(cursor) = &after {
                params.push(("after", cursor.clone()));
            }

            let response = match self.client.get_json(&url, &params, fetch_count as u32).await {
                Ok(value) => value,
                Err(e) if comments.is_empty() => return Err(e),
                Err(e) => {
                    warn!(url, error = %e, "comment stream pagination aborted");
                    break;
                }
            };

            let children = parser::listing_children(&response);
            let before = comments.len();
            comments.extend(children.iter().filter_map(parser::parse_comment));
            after = parser::after_token(&response);

            if comments.len() == before || after.is_none() {
                break;
            }
        }

        comments.truncate(limit);
        Ok(comments)
    }

    /// Subreddit metadata from `about.json`; `None` when the response does
    /// not describe a subreddit.
    pub async fn about(&self, name: &str) -> Result<Option<SubredditInfo>, CoreError> {
        let url = self.endpoint(&format!("/r/{name}/about.json"));
        debug!(url, "fetching subreddit info");
        let response = self.client.get_json(&url, &[], 1).await?;
        Ok(parser::parse_subreddit(&response))
    }

    /// Search subreddits by keyword, paged with `after`.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SubredditInfo>, CoreError> {
        let url = self.endpoint("/subreddits/search.json");
        let mut subreddits: Vec<SubredditInfo> = Vec::new();
        let mut after: Option<String> = None;

        while subreddits.len() < limit {
            let fetch_count = (limit - subreddits.len()).min(MAX_POSTS_PER_REQUEST);
            let mut params: Vec<(&str, String)> = vec![
                ("q", query.to_string()),
                ("limit", fetch_count.to_string()),
            ];
            if let Some(cursor) = &after {
                params.push(("after", cursor.clone()));
            }

            let response = match self.client.get_json(&url, &params, fetch_count as u32).await {
                Ok(value) => value,
                Err(e) if subreddits.is_empty() => return Err(e),
                Err(e) => {
                    warn!(url, error = %e, "subreddit search pagination aborted");
                    break;
                }
            };

            let children = parser::listing_children(&response);
            let before = subreddits.len();
            subreddits.extend(children.iter().filter_map(parser::parse_subreddit));
            after = parser::after_token(&response);

            if subreddits.len() == before || after.is_none() {
                break;
            }
        }

        subreddits.truncate(limit);
        Ok(subreddits)
    }

    /// Validity check for the configured base URL.
    pub fn validate_base_url(&self) -> Result<(), CoreError> {
        Url::parse(&self.base_url)
            .map(|_| ())
            .map_err(|e| CoreError::InvalidInput(format!("invalid base URL: {e}")))
    }
}

#[async_trait]
impl SourceBackend for RedditScraper {
    async fn hot_posts(&self, subreddit: &str, limit: usize) -> Result<Vec<Post>, CoreError> {
        self.hot(subreddit, limit).await
    }

    async fn new_posts(&self, subreddit: &str, limit: usize) -> Result<Vec<Post>, CoreError> {
        self.newest(subreddit, limit).await
    }

    async fn top_posts(
        &self,
        subreddit: &str,
        time_filter: TimeFilter,
        limit: usize,
    ) -> Result<Vec<Post>, CoreError> {
        self.top(subreddit, time_filter, limit).await
    }

    async fn rising_posts(&self, subreddit: &str, limit: usize) -> Result<Vec<Post>, CoreError> {
        self.rising(subreddit, limit).await
    }

    async fn post_comments(&self, post_id: &str, limit: usize) -> Result<Vec<Comment>, CoreError> {
        self.comments_of_post(post_id, limit).await
    }

    async fn subreddit_comments(
        &self,
        subreddit: &str,
        limit: usize,
    ) -> Result<Vec<Comment>, CoreError> {
        self.comment_stream(subreddit, limit).await
    }

    async fn subreddit_info(&self, name: &str) -> Result<Option<SubredditInfo>, CoreError> {
        self.about(name).await
    }

    async fn search_subreddits(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SubredditInfo>, CoreError> {
        self.search(query, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::{RateLimitConfig, RateLimiter};

    fn scraper() -> RedditScraper {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::reddit_scraping()));
        let client = Arc::new(ScrapingClient::new(limiter).unwrap());
        RedditScraper::new(client, "https://old.reddit.com/")
    }

    #[test]
    fn base_url_is_normalized() {
        let scraper = scraper();
        assert_eq!(
            scraper.listing_url("python", "hot"),
            "https://old.reddit.com/r/python/hot.json"
        );
        assert!(scraper.validate_base_url().is_ok());
    }

    #[test]
    fn endpoints_follow_the_documented_patterns() {
        let scraper = scraper();
        assert_eq!(
            scraper.endpoint("/comments/abc123.json"),
            "https://old.reddit.com/comments/abc123.json"
        );
        assert_eq!(
            scraper.endpoint("/r/rust/about.json"),
            "https://old.reddit.com/r/rust/about.json"
        );
        assert_eq!(
            scraper.endpoint("/subreddits/search.json"),
            "https://old.reddit.com/subreddits/search.json"
        );
    }
}
