use reddit_client::UnifiedDataSource;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::monitor::{MonitorConfig, SubredditMonitor};

/// Snapshot of one running monitor for the `/monitors` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorInfo {
    pub subreddit: String,
    pub running: bool,
    pub subscribers: usize,
}

/// Owns one monitor per subreddit, started lazily on first subscription.
pub struct MonitorRegistry {
    source: Arc<UnifiedDataSource>,
    config: MonitorConfig,
    monitors: Mutex<HashMap<String, Arc<SubredditMonitor>>>,
}

impl MonitorRegistry {
    pub fn new(source: Arc<UnifiedDataSource>, config: MonitorConfig) -> Self {
        Self {
            source,
            config,
            monitors: Mutex::new(HashMap::new()),
        }
    }

    /// The monitor for `subreddit`, created and started on first use.
    /// Names are case-folded so `Python` and `python` share one monitor.
    pub fn ensure_monitor(&self, subreddit: &str) -> Arc<SubredditMonitor> {
        let key = subreddit.to_lowercase();
        let monitor = {
            let mut monitors = self.monitors.lock().unwrap();
            monitors
                .entry(key.clone())
                .or_insert_with(|| {
                    info!(subreddit = %key, "registering monitor");
                    SubredditMonitor::new(key.clone(), self.source.clone(), self.config.clone())
                })
                .clone()
        };
        monitor.start();
        monitor
    }

    pub fn get(&self, subreddit: &str) -> Option<Arc<SubredditMonitor>> {
        self.monitors
            .lock()
            .unwrap()
            .get(&subreddit.to_lowercase())
            .cloned()
    }

    pub fn list(&self) -> Vec<MonitorInfo> {
        let monitors = self.monitors.lock().unwrap();
        let mut infos: Vec<MonitorInfo> = monitors
            .values()
            .map(|m| MonitorInfo {
                subreddit: m.subreddit().to_string(),
                running: m.is_running(),
                subscribers: m.subscriber_count(),
            })
            .collect();
        infos.sort_by(|a, b| a.subreddit.cmp(&b.subreddit));
        infos
    }

    /// Stop every monitor; used at shutdown.
    pub fn stop_all(&self) {
        let monitors = self.monitors.lock().unwrap();
        for monitor in monitors.values() {
            monitor.stop();
        }
        info!(count = monitors.len(), "all monitors stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use redwatch_core::{Comment, CoreError, Post, SubredditInfo, TimeFilter};
    use reddit_client::{SourceBackend, SourceStrategy};

    struct EmptyBackend;

    #[async_trait]
    impl SourceBackend for EmptyBackend {
        async fn hot_posts(&self, _: &str, _: usize) -> Result<Vec<Post>, CoreError> {
            Ok(Vec::new())
        }
        async fn new_posts(&self, _: &str, _: usize) -> Result<Vec<Post>, CoreError> {
            Ok(Vec::new())
        }
        async fn top_posts(
            &self,
            _: &str,
            _: TimeFilter,
            _: usize,
        ) -> Result<Vec<Post>, CoreError> {
            Ok(Vec::new())
        }
        async fn rising_posts(&self, _: &str, _: usize) -> Result<Vec<Post>, CoreError> {
            Ok(Vec::new())
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

    fn registry() -> MonitorRegistry {
        let source = Arc::new(UnifiedDataSource::new(
            None,
            Arc::new(EmptyBackend),
            SourceStrategy::ScrapingOnly,
        ));
        MonitorRegistry::new(source, MonitorConfig::default())
    }

    #[tokio::test]
    async fn monitors_are_shared_case_insensitively() {
        let registry = registry();

        let a = registry.ensure_monitor("Python");
        let b = registry.ensure_monitor("python");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_running());

        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].subreddit, "python");

        registry.stop_all();
        assert!(!a.is_running());
    }

    #[tokio::test]
    async fn get_does_not_create_monitors() {
        let registry = registry();
        assert!(registry.get("rust").is_none());
        registry.ensure_monitor("rust");
        assert!(registry.get("RUST").is_some());
        registry.stop_all();
    }
}
