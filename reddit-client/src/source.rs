use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use redwatch_core::{Comment, CoreError, Post, SubredditInfo, TimeFilter};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Consecutive failures after which a backend stops being selected.
pub const FAILURE_THRESHOLD: u32 = 5;

/// The operation set every backend must provide.
///
/// Object-safe so the unified source can hold the API client and the
/// scraper behind the same handle, and so tests can inject fakes.
#[async_trait]
pub trait SourceBackend: Send + Sync {
    async fn hot_posts(&self, subreddit: &str, limit: usize) -> Result<Vec<Post>, CoreError>;
    async fn new_posts(&self, subreddit: &str, limit: usize) -> Result<Vec<Post>, CoreError>;
    async fn top_posts(
        &self,
        subreddit: &str,
        time_filter: TimeFilter,
        limit: usize,
    ) -> Result<Vec<Post>, CoreError>;
    async fn rising_posts(&self, subreddit: &str, limit: usize) -> Result<Vec<Post>, CoreError>;
    async fn post_comments(&self, post_id: &str, limit: usize) -> Result<Vec<Comment>, CoreError>;
    async fn subreddit_comments(
        &self,
        subreddit: &str,
        limit: usize,
    ) -> Result<Vec<Comment>, CoreError>;
    async fn subreddit_info(&self, name: &str) -> Result<Option<SubredditInfo>, CoreError>;
    async fn search_subreddits(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SubredditInfo>, CoreError>;
}

/// Backend selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceStrategy {
    ApiOnly,
    ScrapingOnly,
    #[default]
    ApiFirst,
    ScrapingFirst,
}

impl FromStr for SourceStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "api_only" | "api-only" => Ok(SourceStrategy::ApiOnly),
            "scraping_only" | "scraping-only" => Ok(SourceStrategy::ScrapingOnly),
            "api_first" | "api-first" => Ok(SourceStrategy::ApiFirst),
            "scraping_first" | "scraping-first" => Ok(SourceStrategy::ScrapingFirst),
            other => Err(CoreError::InvalidInput(format!(
                "unknown source strategy: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendKind {
    Api,
    Scraping,
}

/// Health of both backends, updated on every fetch attempt.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub api_available: bool,
    pub scraping_available: bool,
    pub last_api_error: Option<String>,
    pub last_scraping_error: Option<String>,
    pub api_failure_count: u32,
    pub scraping_failure_count: u32,
}

impl Default for SourceStatus {
    fn default() -> Self {
        Self {
            api_available: true,
            scraping_available: true,
            last_api_error: None,
            last_scraping_error: None,
            api_failure_count: 0,
            scraping_failure_count: 0,
        }
    }
}

/// Dual-backend fetcher with failure-driven fallback.
///
/// Every operation picks a primary backend by strategy and per-backend
/// health, falls back to the alternative on failure (unless the strategy
/// is `*Only`), and keeps per-backend failure counters: five consecutive
/// failures disable a backend, any success resets its counter. There is no
/// timed half-open state; recovery happens through the next successful
/// call.
pub struct UnifiedDataSource {
    api: Option<Arc<dyn SourceBackend>>,
    scraping: Arc<dyn SourceBackend>,
    strategy: SourceStrategy,
    status: Mutex<SourceStatus>,
}

impl UnifiedDataSource {
    pub fn new(
        api: Option<Arc<dyn SourceBackend>>,
        scraping: Arc<dyn SourceBackend>,
        strategy: SourceStrategy,
    ) -> Self {
        if api.is_none() && matches!(strategy, SourceStrategy::ApiOnly | SourceStrategy::ApiFirst)
        {
            info!("no API backend configured, operating on the scraping backend");
        }

        Self {
            api,
            scraping,
            strategy,
            status: Mutex::new(SourceStatus::default()),
        }
    }

    pub fn strategy(&self) -> SourceStrategy {
        self.strategy
    }

    pub fn status(&self) -> SourceStatus {
        self.status.lock().unwrap().clone()
    }

    fn record_success(&self, kind: BackendKind) {
        let mut status = self.status.lock().unwrap();
        match kind {
            BackendKind::Api => {
                status.api_failure_count = 0;
                status.api_available = true;
            }
            BackendKind::Scraping => {
                status.scraping_failure_count = 0;
                status.scraping_available = true;
            }
        }
    }

    fn record_failure(&self, kind: BackendKind, error: &CoreError) {
        let mut status = self.status.lock().unwrap();
        match kind {
            BackendKind::Api => {
                status.api_failure_count += 1;
                status.last_api_error = Some(error.to_string());
                status.api_available = status.api_failure_count < FAILURE_THRESHOLD;
                if !status.api_available {
                    warn!(
                        failures = status.api_failure_count,
                        "API backend disabled after repeated failures"
                    );
                }
            }
            BackendKind::Scraping => {
                status.scraping_failure_count += 1;
                status.last_scraping_error = Some(error.to_string());
                status.scraping_available = status.scraping_failure_count < FAILURE_THRESHOLD;
                if !status.scraping_available {
                    warn!(
                        failures = status.scraping_failure_count,
                        "scraping backend disabled after repeated failures"
                    );
                }
            }
        }
    }

    /// Backends to try for one operation, in order.
    fn backend_order(&self) -> Vec<(BackendKind, Arc<dyn SourceBackend>)> {
        let (api_ok, scraping_ok) = {
            let status = self.status.lock().unwrap();
            (status.api_available, status.scraping_available)
        };

        let api = self
            .api
            .clone()
            .map(|backend| (BackendKind::Api, backend));
        let scraping = (BackendKind::Scraping, self.scraping.clone());

        match self.strategy {
            SourceStrategy::ApiOnly => api.into_iter().collect(),
            SourceStrategy::ScrapingOnly => vec![scraping],
            SourceStrategy::ApiFirst => {
                let mut order = Vec::with_capacity(2);
                if let Some(api) = api.clone() {
                    if api_ok {
                        order.push(api);
                    }
                }
                if scraping_ok {
                    order.push(scraping.clone());
                }
                if order.is_empty() {
                    // Every backend is past the threshold; attempt them
                    // anyway, a success is the only way counters reset.
                    order.extend(api);
                    order.push(scraping);
                }
                order
            }
            SourceStrategy::ScrapingFirst => {
                let mut order = Vec::with_capacity(2);
                if scraping_ok {
                    order.push(scraping.clone());
                }
                if let Some(api) = api.clone() {
                    if api_ok {
                        order.push(api);
                    }
                }
                if order.is_empty() {
                    order.push(scraping);
                    order.extend(api);
                }
                order
            }
        }
    }

    async fn execute<T, F>(&self, operation: &str, run: F) -> Result<T, CoreError>
    where
        F: Fn(Arc<dyn SourceBackend>) -> BoxFuture<'static, Result<T, CoreError>>,
    {
        let order = self.backend_order();
        if order.is_empty() {
            return Err(CoreError::DataSource {
                api: "backend not configured".to_string(),
                scraping: "not attempted".to_string(),
            });
        }

        let mut api_error: Option<String> = None;
        let mut scraping_error: Option<String> = None;

        for (kind, backend) in order {
            match run(backend).await {
                Ok(value) => {
                    self.record_success(kind);
                    return Ok(value);
                }
                Err(e) => {
                    debug!(
                        operation,
                        backend = ?kind,
                        error = %e,
                        fallback_class = e.is_fallback_error(),
                        "backend call failed"
                    );
                    self.record_failure(kind, &e);
                    match kind {
                        BackendKind::Api => api_error = Some(e.to_string()),
                        BackendKind::Scraping => scraping_error = Some(e.to_string()),
                    }
                }
            }
        }

        Err(CoreError::DataSource {
            api: api_error.unwrap_or_else(|| "not attempted".to_string()),
            scraping: scraping_error.unwrap_or_else(|| "not attempted".to_string()),
        })
    }

    pub async fn get_hot_posts(
        &self,
        subreddit: &str,
        limit: usize,
    ) -> Result<Vec<Post>, CoreError> {
        let subreddit = subreddit.to_string();
        self.execute("get_hot_posts", move |backend| {
            let subreddit = subreddit.clone();
            async move { backend.hot_posts(&subreddit, limit).await }.boxed()
        })
        .await
    }

    pub async fn get_new_posts(
        &self,
        subreddit: &str,
        limit: usize,
    ) -> Result<Vec<Post>, CoreError> {
        let subreddit = subreddit.to_string();
        self.execute("get_new_posts", move |backend| {
            let subreddit = subreddit.clone();
            async move { backend.new_posts(&subreddit, limit).await }.boxed()
        })
        .await
    }

    pub async fn get_top_posts(
        &self,
        subreddit: &str,
        time_filter: TimeFilter,
        limit: usize,
    ) -> Result<Vec<Post>, CoreError> {
        let subreddit = subreddit.to_string();
        self.execute("get_top_posts", move |backend| {
            let subreddit = subreddit.clone();
            async move { backend.top_posts(&subreddit, time_filter, limit).await }.boxed()
        })
        .await
    }

    pub async fn get_rising_posts(
        &self,
        subreddit: &str,
        limit: usize,
    ) -> Result<Vec<Post>, CoreError> {
        let subreddit = subreddit.to_string();
        self.execute("get_rising_posts", move |backend| {
            let subreddit = subreddit.clone();
            async move { backend.rising_posts(&subreddit, limit).await }.boxed()
        })
        .await
    }

    pub async fn get_post_comments(
        &self,
        post_id: &str,
        limit: usize,
    ) -> Result<Vec<Comment>, CoreError> {
        let post_id = post_id.to_string();
        self.execute("get_post_comments", move |backend| {
            let post_id = post_id.clone();
            async move { backend.post_comments(&post_id, limit).await }.boxed()
        })
        .await
    }

    pub async fn get_subreddit_comments(
        &self,
        subreddit: &str,
        limit: usize,
    ) -> Result<Vec<Comment>, CoreError> {
        let subreddit = subreddit.to_string();
        self.execute("get_subreddit_comments", move |backend| {
            let subreddit = subreddit.clone();
            async move { backend.subreddit_comments(&subreddit, limit).await }.boxed()
        })
        .await
    }

    pub async fn get_subreddit_info(
        &self,
        name: &str,
    ) -> Result<Option<SubredditInfo>, CoreError> {
        let name = name.to_string();
        self.execute("get_subreddit_info", move |backend| {
            let name = name.clone();
            async move { backend.subreddit_info(&name).await }.boxed()
        })
        .await
    }

    pub async fn search_subreddits(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SubredditInfo>, CoreError> {
        let query = query.to_string();
        self.execute("search_subreddits", move |backend| {
            let query = query.clone();
            async move { backend.search_subreddits(&query, limit).await }.boxed()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use redwatch_core::SourceError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_post(id: &str) -> Post {
        Post {
            id: id.to_string(),
            title: format!("post {id}"),
            selftext: String::new(),
            author: "someone".to_string(),
            subreddit: "python".to_string(),
            score: 1,
            num_comments: 0,
            created_utc: Utc::now(),
            url: format!("https://example.com/{id}"),
            permalink: format!("https://reddit.com/r/python/comments/{id}/"),
            is_self: false,
        }
    }

    fn rate_limit_error() -> CoreError {
        CoreError::Source(SourceError::Scraping {
            message: "429 Too Many Requests".to_string(),
            status_code: Some(429),
        })
    }

    /// Scripted backend: pops one canned response per post call.
    struct MockBackend {
        responses: Mutex<VecDeque<Result<Vec<Post>, CoreError>>>,
        calls: AtomicUsize,
    }

    impl MockBackend {
        fn new(responses: Vec<Result<Vec<Post>, CoreError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn always_failing() -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn next(&self) -> Result<Vec<Post>, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(rate_limit_error()))
        }
    }

    #[async_trait]
    impl SourceBackend for MockBackend {
        async fn hot_posts(&self, _: &str, _: usize) -> Result<Vec<Post>, CoreError> {
            self.next()
        }
        async fn new_posts(&self, _: &str, _: usize) -> Result<Vec<Post>, CoreError> {
            self.next()
        }
        async fn top_posts(
            &self,
            _: &str,
            _: TimeFilter,
            _: usize,
        ) -> Result<Vec<Post>, CoreError> {
            self.next()
        }
        async fn rising_posts(&self, _: &str, _: usize) -> Result<Vec<Post>, CoreError> {
            self.next()
        }
        async fn post_comments(&self, _: &str, _: usize) -> Result<Vec<Comment>, CoreError> {
            Ok(Vec::new())
        }
        async fn subreddit_comments(&self, _: &str, _: usize) -> Result<Vec<Comment>, CoreError> {
            Ok(Vec::new())
        }
        async fn subreddit_info(&self, _: &str) -> Result<Option<SubredditInfo>, CoreError> {
            Ok(None)
        }
        async fn search_subreddits(
            &self,
            _: &str,
            _: usize,
        ) -> Result<Vec<SubredditInfo>, CoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn strategy_parses_from_config_strings() {
        assert_eq!(
            "api_first".parse::<SourceStrategy>().unwrap(),
            SourceStrategy::ApiFirst
        );
        assert_eq!(
            "scraping-only".parse::<SourceStrategy>().unwrap(),
            SourceStrategy::ScrapingOnly
        );
        assert!("praw".parse::<SourceStrategy>().is_err());
    }

    // API raises a 429-flavored error, scraper answers: the call succeeds
    // through the fallback and the counters reflect exactly one API failure.
    #[tokio::test]
    async fn api_failure_falls_back_to_scraping() {
        let api = MockBackend::new(vec![Err(rate_limit_error())]);
        let scraping = MockBackend::new(vec![Ok(vec![sample_post("test123")])]);
        let source = UnifiedDataSource::new(
            Some(api.clone()),
            scraping.clone(),
            SourceStrategy::ApiFirst,
        );

        let posts = source.get_hot_posts("python", 10).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "test123");

        let status = source.status();
        assert_eq!(status.api_failure_count, 1);
        assert_eq!(status.scraping_failure_count, 0);
        assert!(status.api_available);
        assert!(status.last_api_error.is_some());
    }

    #[tokio::test]
    async fn success_resets_the_failure_counter() {
        let api = MockBackend::new(vec![
            Err(rate_limit_error()),
            Err(rate_limit_error()),
            Ok(vec![sample_post("a")]),
        ]);
        let scraping = MockBackend::new(vec![
            Ok(vec![sample_post("s1")]),
            Ok(vec![sample_post("s2")]),
        ]);
        let source =
            UnifiedDataSource::new(Some(api), scraping, SourceStrategy::ApiFirst);

        source.get_hot_posts("python", 5).await.unwrap();
        source.get_hot_posts("python", 5).await.unwrap();
        assert_eq!(source.status().api_failure_count, 2);

        source.get_hot_posts("python", 5).await.unwrap();
        assert_eq!(source.status().api_failure_count, 0);
    }

    #[tokio::test]
    async fn disabled_backend_is_not_attempted() {
        let api = MockBackend::always_failing();
        let scraping = MockBackend::new(vec![
            Ok(vec![sample_post("1")]),
            Ok(vec![sample_post("2")]),
            Ok(vec![sample_post("3")]),
            Ok(vec![sample_post("4")]),
            Ok(vec![sample_post("5")]),
            Ok(vec![sample_post("6")]),
        ]);
        let source = UnifiedDataSource::new(
            Some(api.clone()),
            scraping.clone(),
            SourceStrategy::ApiFirst,
        );

        for _ in 0..FAILURE_THRESHOLD {
            source.get_new_posts("python", 5).await.unwrap();
        }
        assert!(!source.status().api_available);
        assert_eq!(api.calls(), FAILURE_THRESHOLD as usize);

        // The sixth call routes straight to scraping.
        source.get_new_posts("python", 5).await.unwrap();
        assert_eq!(api.calls(), FAILURE_THRESHOLD as usize);
        assert_eq!(scraping.calls(), FAILURE_THRESHOLD as usize + 1);
    }

    #[tokio::test]
    async fn only_strategies_never_fall_back() {
        let api = MockBackend::new(vec![Err(rate_limit_error())]);
        let scraping = MockBackend::new(vec![Ok(vec![sample_post("s")])]);
        let source = UnifiedDataSource::new(
            Some(api),
            scraping.clone(),
            SourceStrategy::ApiOnly,
        );

        let err = source.get_hot_posts("python", 5).await.unwrap_err();
        assert!(matches!(err, CoreError::DataSource { .. }));
        assert_eq!(scraping.calls(), 0);
    }

    #[tokio::test]
    async fn both_backends_failing_aggregates_both_causes() {
        let api = MockBackend::always_failing();
        let scraping = MockBackend::always_failing();
        let source =
            UnifiedDataSource::new(Some(api), scraping, SourceStrategy::ApiFirst);

        match source.get_hot_posts("python", 5).await {
            Err(CoreError::DataSource { api, scraping }) => {
                assert!(api.contains("429"));
                assert!(scraping.contains("429"));
            }
            other => panic!("expected DataSource error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn scraping_first_prefers_the_scraper() {
        let api = MockBackend::new(vec![Ok(vec![sample_post("api")])]);
        let scraping = MockBackend::new(vec![Ok(vec![sample_post("scraped")])]);
        let source = UnifiedDataSource::new(
            Some(api.clone()),
            scraping,
            SourceStrategy::ScrapingFirst,
        );

        let posts = source.get_hot_posts("python", 5).await.unwrap();
        assert_eq!(posts[0].id, "scraped");
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test]
    async fn missing_api_backend_degrades_to_scraping() {
        let scraping = MockBackend::new(vec![Ok(vec![sample_post("only")])]);
        let source = UnifiedDataSource::new(None, scraping, SourceStrategy::ApiFirst);

        let posts = source.get_hot_posts("python", 5).await.unwrap();
        assert_eq!(posts[0].id, "only");
    }
}
