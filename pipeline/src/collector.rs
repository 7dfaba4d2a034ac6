use chrono::{DateTime, Utc};
use redwatch_core::{CoreError, SortOrder, TimeFilter};
use reddit_client::UnifiedDataSource;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::pipeline::{DataPipeline, ProcessingResult};

/// Settings for collecting one subreddit.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub subreddit: String,
    pub sort: SortOrder,
    pub limit: usize,
    pub include_comments: bool,
    pub comment_limit: usize,
    pub time_filter: TimeFilter,
}

impl CollectorConfig {
    pub fn new(subreddit: impl Into<String>) -> Self {
        Self {
            subreddit: subreddit.into(),
            sort: SortOrder::Hot,
            limit: 100,
            include_comments: false,
            comment_limit: 50,
            time_filter: TimeFilter::Week,
        }
    }
}

/// What happened when one subreddit was collected. `error` captures any
/// failure so a batch never aborts on a single subreddit.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionResult {
    pub subreddit: String,
    pub posts: ProcessingResult,
    pub comments: Option<ProcessingResult>,
    pub duration_seconds: f64,
    pub collected_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl CollectionResult {
    fn empty(subreddit: &str) -> Self {
        Self {
            subreddit: subreddit.to_string(),
            posts: ProcessingResult::default(),
            comments: None,
            duration_seconds: 0.0,
            collected_at: Utc::now(),
            error: None,
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Drives the unified source and the pipeline for one subreddit at a time.
/// Resources are injected at construction and released by drop.
#[derive(Clone)]
pub struct Collector {
    pipeline: DataPipeline,
    source: Arc<UnifiedDataSource>,
}

impl Collector {
    pub fn new(pipeline: DataPipeline, source: Arc<UnifiedDataSource>) -> Self {
        Self { pipeline, source }
    }

    pub fn source(&self) -> &Arc<UnifiedDataSource> {
        &self.source
    }

    pub fn pipeline(&self) -> &DataPipeline {
        &self.pipeline
    }

    /// Collect one subreddit. Failures land in the result's `error` field.
    pub async fn collect_subreddit(&self, config: &CollectorConfig) -> CollectionResult {
        let started = Instant::now();
        let mut result = CollectionResult::empty(&config.subreddit);

        match self
            .pipeline
            .collect_and_store(
                &self.source,
                &config.subreddit,
                config.sort,
                config.limit,
                config.include_comments,
                config.comment_limit,
                config.time_filter,
            )
            .await
        {
            Ok(outcome) => {
                result.posts = outcome.posts;
                result.comments = outcome.comments;
            }
            Err(e) => {
                error!(subreddit = %config.subreddit, error = %e, "collection failed");
                result.error = Some(e.to_string());
            }
        }

        result.duration_seconds = started.elapsed().as_secs_f64();
        result.collected_at = Utc::now();

        info!(
            subreddit = %config.subreddit,
            new_posts = result.posts.new,
            duration_secs = result.duration_seconds,
            success = result.success(),
            "collection finished"
        );
        result
    }

    /// Collect several subreddits sequentially, in the configured order.
    pub async fn collect_multiple(&self, configs: &[CollectorConfig]) -> Vec<CollectionResult> {
        let mut results = Vec::with_capacity(configs.len());
        for config in configs {
            results.push(self.collect_subreddit(config).await);
        }

        let succeeded = results.iter().filter(|r| r.success()).count();
        let new_posts: usize = results.iter().map(|r| r.posts.new).sum();
        info!(
            total = configs.len(),
            succeeded,
            new_posts,
            "batch collection finished"
        );
        results
    }

    /// Convenience wrapper over [`Collector::collect_multiple`] for a plain
    /// list of subreddit names sharing one set of options.
    #[allow(clippy::too_many_arguments)]
    pub async fn collect_from_list(
        &self,
        subreddits: &[String],
        sort: SortOrder,
        limit: usize,
        include_comments: bool,
        comment_limit: usize,
        time_filter: TimeFilter,
    ) -> Vec<CollectionResult> {
        let configs: Vec<CollectorConfig> = subreddits
            .iter()
            .map(|name| CollectorConfig {
                subreddit: name.clone(),
                sort,
                limit,
                include_comments,
                comment_limit,
                time_filter,
            })
            .collect();
        self.collect_multiple(&configs).await
    }
}

/// Parse a configured sort string, warning and falling back to `hot` on
/// unknown input.
pub fn sort_or_hot(raw: &str) -> SortOrder {
    raw.parse().unwrap_or_else(|_: CoreError| {
        tracing::warn!(sort = raw, "unknown sort order, falling back to hot");
        SortOrder::Hot
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_the_documented_values() {
        let config = CollectorConfig::new("python");
        assert_eq!(config.sort, SortOrder::Hot);
        assert_eq!(config.limit, 100);
        assert_eq!(config.comment_limit, 50);
        assert!(!config.include_comments);
        assert_eq!(config.time_filter, TimeFilter::Week);
    }

    #[test]
    fn unknown_sort_falls_back_to_hot() {
        assert_eq!(sort_or_hot("rising"), SortOrder::Rising);
        assert_eq!(sort_or_hot("controversial"), SortOrder::Hot);
    }

    #[test]
    fn success_mirrors_the_error_field() {
        let mut result = CollectionResult::empty("python");
        assert!(result.success());
        result.error = Some("boom".to_string());
        assert!(!result.success());
    }
}
