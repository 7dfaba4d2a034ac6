use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthUrl, ClientId, ClientSecret, TokenResponse, TokenUrl};
use redwatch_core::{Comment, ConfigError, CoreError, Post, SourceError, SubredditInfo, TimeFilter};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::http::retry_after_seconds;
use crate::parser;
use crate::rate_limiter::RateLimiter;
use crate::source::SourceBackend;

const REDDIT_API_BASE: &str = "https://oauth.reddit.com";
const REDDIT_AUTH_URL: &str = "https://www.reddit.com/api/v1/authorize";
const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

const MAX_POSTS_PER_REQUEST: usize = 100;
const MAX_COMMENTS_PER_REQUEST: usize = 500;

/// Refresh the cached token this long before it actually expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
struct ApiToken {
    access_token: String,
    expires_at: SystemTime,
}

impl ApiToken {
    fn is_fresh(&self) -> bool {
        self.expires_at > SystemTime::now() + TOKEN_EXPIRY_MARGIN
    }
}

/// Backend over the authenticated Reddit API.
///
/// Authenticates with the OAuth2 client-credentials grant (script-type
/// application) and issues bearer-token requests against
/// `oauth.reddit.com`. The response envelope matches the public JSON
/// endpoints, so decoding is shared with the scraper.
pub struct RedditApiClient {
    http: Client,
    oauth: BasicClient,
    token: Mutex<Option<ApiToken>>,
    rate_limiter: Arc<RateLimiter>,
    user_agent: String,
}

impl RedditApiClient {
    pub fn new(
        credentials: ApiCredentials,
        user_agent: String,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, CoreError> {
        let oauth = BasicClient::new(
            ClientId::new(credentials.client_id),
            Some(ClientSecret::new(credentials.client_secret)),
            AuthUrl::new(REDDIT_AUTH_URL.to_string()).map_err(|e| {
                ConfigError::InvalidValue {
                    field: "auth_url".to_string(),
                    value: e.to_string(),
                }
            })?,
            Some(TokenUrl::new(REDDIT_TOKEN_URL.to_string()).map_err(|e| {
                ConfigError::InvalidValue {
                    field: "token_url".to_string(),
                    value: e.to_string(),
                }
            })?),
        );

        let http = Client::builder()
            .user_agent(&user_agent)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(CoreError::Network)?;

        Ok(Self {
            http,
            oauth,
            token: Mutex::new(None),
            rate_limiter,
            user_agent,
        })
    }

    /// Current bearer token, re-exchanging the client credentials when the
    /// cached one is missing or about to expire.
    async fn access_token(&self) -> Result<String, CoreError> {
        let mut guard = self.token.lock().await;

        if let Some(token) = guard.as_ref() {
            if token.is_fresh() {
                return Ok(token.access_token.clone());
            }
        }

        debug!("exchanging client credentials for a new API token");
        let response = self
            .oauth
            .exchange_client_credentials()
            .request_async(async_http_client)
            .await
            .map_err(|e| SourceError::AuthenticationFailed {
                reason: format!("token exchange failed: {e}"),
            })?;

        let expires_at =
            SystemTime::now() + response.expires_in().unwrap_or(Duration::from_secs(3600));
        let token = ApiToken {
            access_token: response.access_token().secret().clone(),
            expires_at,
        };
        let access = token.access_token.clone();
        *guard = Some(token);

        info!("authenticated against the Reddit API");
        Ok(access)
    }

    async fn get_json(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        cost: u32,
    ) -> Result<Value, CoreError> {
        let token = self.access_token().await?;
        self.rate_limiter.acquire(cost).await;

        let url = format!("{REDDIT_API_BASE}{endpoint}");
        debug!(%url, "making Reddit API request");

        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .query(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::from(SourceError::RequestTimeout)
                } else {
                    CoreError::Network(e)
                }
            })?;

        let status = response.status();
        match status.as_u16() {
            429 => {
                let retry_after = retry_after_seconds(response.headers());
                warn!(endpoint, retry_after, "API rate limited");
                Err(SourceError::RateLimitExceeded { retry_after }.into())
            }
            401 => {
                // Token was revoked early; force a re-exchange next time.
                self.token.lock().await.take();
                Err(SourceError::AuthenticationFailed {
                    reason: "invalid or expired token".to_string(),
                }
                .into())
            }
            403 => Err(SourceError::Forbidden {
                resource: endpoint.to_string(),
            }
            .into()),
            s if status.is_server_error() => {
                Err(SourceError::ServerError { status_code: s }.into())
            }
            s if !status.is_success() => Err(SourceError::InvalidResponse {
                details: format!("unexpected status {s} for {endpoint}"),
            }
            .into()),
            _ => response.json::<Value>().await.map_err(|e| {
                SourceError::InvalidResponse {
                    details: format!("failed to decode response: {e}"),
                }
                .into()
            }),
        }
    }

    async fn fetch_posts(
        &self,
        endpoint: &str,
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

            let response = match self.get_json(endpoint, &params, fetch_count as u32).await {
                Ok(value) => value,
                Err(e) if posts.is_empty() => return Err(e),
                Err(e) => {
                    warn!(endpoint, error = %e, "pagination aborted, returning partial results");
                    break;
                }
            };

            let page = parser::extract_posts(&response);
            after = parser::after_token(&response);

            if page.is_empty() {
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
}

#[async_trait]
impl SourceBackend for RedditApiClient {
    async fn hot_posts(&self, subreddit: &str, limit: usize) -> Result<Vec<Post>, CoreError> {
        self.fetch_posts(&format!("/r/{subreddit}/hot"), &[], limit)
            .await
    }

    async fn new_posts(&self, subreddit: &str, limit: usize) -> Result<Vec<Post>, CoreError> {
        self.fetch_posts(&format!("/r/{subreddit}/new"), &[], limit)
            .await
    }

    async fn top_posts(
        &self,
        subreddit: &str,
        time_filter: TimeFilter,
        limit: usize,
    ) -> Result<Vec<Post>, CoreError> {
        let extra = [("t", time_filter.as_str().to_string())];
        self.fetch_posts(&format!("/r/{subreddit}/top"), &extra, limit)
            .await
    }

    async fn rising_posts(&self, subreddit: &str, limit: usize) -> Result<Vec<Post>, CoreError> {
        self.fetch_posts(&format!("/r/{subreddit}/rising"), &[], limit)
            .await
    }

    async fn post_comments(&self, post_id: &str, limit: usize) -> Result<Vec<Comment>, CoreError> {
        let effective_limit = limit.min(MAX_COMMENTS_PER_REQUEST);
        let params = [("limit", effective_limit.to_string())];
        let response = self
            .get_json(
                &format!("/comments/{post_id}"),
                &params,
                effective_limit as u32,
            )
            .await?;

        let mut comments = parser::extract_comments(&response);
        comments.truncate(limit);
        Ok(comments)
    }

    async fn subreddit_comments(
        &self,
        subreddit: &str,
        limit: usize,
    ) -> Result<Vec<Comment>, CoreError> {
        let endpoint = format!("/r/{subreddit}/comments");
        let mut comments: Vec<Comment> = Vec::new();
        let mut after: Option<String> = None;

        while comments.len() < limit {
            let fetch_count = (limit - comments.len()).min(MAX_POSTS_PER_REQUEST);
            let mut params: Vec<(&str, String)> = vec![("limit", fetch_count.to_string())];
            if let Some(cursor) = &after {
                params.push(("after", cursor.clone()));
            }

            let response = match self.get_json(&endpoint, &params, fetch_count as u32).await {
                Ok(value) => value,
                Err(e) if comments.is_empty() => return Err(e),
                Err(e) => {
                    warn!(endpoint, error = %e, "comment stream pagination aborted");
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

    async fn subreddit_info(&self, name: &str) -> Result<Option<SubredditInfo>, CoreError> {
        let response = self.get_json(&format!("/r/{name}/about"), &[], 1).await?;
        Ok(parser::parse_subreddit(&response))
    }

    async fn search_subreddits(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SubredditInfo>, CoreError> {
        let fetch_count = limit.min(MAX_POSTS_PER_REQUEST);
        let params = [
            ("q", query.to_string()),
            ("limit", fetch_count.to_string()),
        ];
        let response = self
            .get_json("/subreddits/search", &params, fetch_count as u32)
            .await?;

        let mut subreddits: Vec<SubredditInfo> = parser::listing_children(&response)
            .iter()
            .filter_map(parser::parse_subreddit)
            .collect();
        subreddits.truncate(limit);
        Ok(subreddits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::RateLimitConfig;

    #[tokio::test]
    async fn client_starts_without_a_cached_token() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::per_minute(100, 10_000)));
        let client = RedditApiClient::new(
            ApiCredentials {
                client_id: "id".into(),
                client_secret: "secret".into(),
            },
            "redwatch-test/0.1".into(),
            limiter,
        )
        .unwrap();

        assert!(client.token.lock().await.is_none());
        assert_eq!(client.user_agent, "redwatch-test/0.1");
    }

    #[test]
    fn stale_tokens_are_detected() {
        let fresh = ApiToken {
            access_token: "abc".into(),
            expires_at: SystemTime::now() + Duration::from_secs(3600),
        };
        assert!(fresh.is_fresh());

        let stale = ApiToken {
            access_token: "abc".into(),
            expires_at: SystemTime::now() + Duration::from_secs(30),
        };
        assert!(!stale.is_fresh());
    }
}
