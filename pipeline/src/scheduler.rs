//! Interval scheduler over the collector.
//!
//! Runs are strictly serialized; subreddits within a run are processed in
//! the configured order. `stop` is cooperative and takes effect at the
//! next run boundary, while task cancellation interrupts the sleep
//! immediately.

use chrono::{DateTime, Utc};
use redwatch_core::{SortOrder, TimeFilter};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::collector::{CollectionResult, Collector, CollectorConfig};

/// Settings for the repeating collection loop.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub subreddits: Vec<String>,
    pub interval_minutes: u64,
    pub sort: SortOrder,
    pub limit: usize,
    pub include_comments: bool,
    pub comment_limit: usize,
    pub time_filter: TimeFilter,
}

impl ScheduleConfig {
    pub fn new(subreddits: Vec<String>, interval_minutes: u64) -> Self {
        Self {
            subreddits,
            interval_minutes: interval_minutes.max(1),
            sort: SortOrder::Hot,
            limit: 100,
            include_comments: false,
            comment_limit: 50,
            time_filter: TimeFilter::Week,
        }
    }

    fn collector_configs(&self) -> Vec<CollectorConfig> {
        self.subreddits
            .iter()
            .map(|subreddit| CollectorConfig {
                subreddit: subreddit.clone(),
                sort: self.sort,
                limit: self.limit,
                include_comments: self.include_comments,
                comment_limit: self.comment_limit,
                time_filter: self.time_filter,
            })
            .collect()
    }
}

/// One completed fan-out over the configured subreddits.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleRun {
    pub run_id: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub results: Vec<CollectionResult>,
    pub success: bool,
    pub error: Option<String>,
}

impl ScheduleRun {
    pub fn duration_seconds(&self) -> f64 {
        (self.completed_at - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    pub fn total_new_posts(&self) -> usize {
        self.results.iter().map(|r| r.posts.new).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

/// Aggregate counters over the scheduler's lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub last_run: Option<ScheduleRun>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub total_posts_collected: u64,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self {
            state: SchedulerState::Idle,
            last_run: None,
            next_run_at: None,
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            total_posts_collected: 0,
        }
    }
}

#[derive(Debug, Default)]
struct SchedulerInner {
    run_count: u64,
    history: Vec<ScheduleRun>,
    status: SchedulerStatus,
    running: bool,
}

impl Default for SchedulerState {
    fn default() -> Self {
        SchedulerState::Idle
    }
}

/// Simple interval scheduler built on `tokio::time::sleep`.
pub struct SimpleScheduler {
    collector: Collector,
    config: ScheduleConfig,
    inner: Mutex<SchedulerInner>,
    stop_tx: watch::Sender<bool>,
}

impl SimpleScheduler {
    pub fn new(collector: Collector, config: ScheduleConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            collector,
            config,
            inner: Mutex::new(SchedulerInner::default()),
            stop_tx,
        }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().unwrap().running
    }

    pub fn status(&self) -> SchedulerStatus {
        self.inner.lock().unwrap().status.clone()
    }

    pub fn history(&self) -> Vec<ScheduleRun> {
        self.inner.lock().unwrap().history.clone()
    }

    /// Trigger exactly one fan-out over the configured subreddit list and
    /// record it in the run history.
    pub async fn run_once(&self) -> Vec<CollectionResult> {
        let run_id = {
            let mut inner = self.inner.lock().unwrap();
            inner.run_count += 1;
            inner.run_count
        };
        let started_at = Utc::now();
        info!(run_id, "schedule run started");

        let results = self
            .collector
            .collect_multiple(&self.config.collector_configs())
            .await;

        let success = results.iter().all(|r| r.success());
        let error = (!success).then(|| {
            results
                .iter()
                .filter_map(|r| r.error.as_deref())
                .collect::<Vec<_>>()
                .join("; ")
        });

        let run = ScheduleRun {
            run_id,
            started_at,
            completed_at: Utc::now(),
            results: results.clone(),
            success,
            error,
        };

        {
            let mut inner = self.inner.lock().unwrap();
            inner.status.total_runs += 1;
            if run.success {
                inner.status.successful_runs += 1;
            } else {
                inner.status.failed_runs += 1;
            }
            inner.status.total_posts_collected += run.total_new_posts() as u64;
            inner.status.last_run = Some(run.clone());
            inner.history.push(run.clone());
        }

        info!(
            run_id,
            new_posts = run.total_new_posts(),
            duration_secs = run.duration_seconds(),
            success = run.success,
            "schedule run finished"
        );
        results
    }

    /// Repeat `run_once` every `interval_minutes`, up to `max_runs` when
    /// given. Returns when stopped, when the run budget is exhausted, or
    /// immediately if another loop is already active.
    pub async fn start(&self, max_runs: Option<u64>) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.running {
                warn!("scheduler already running");
                return;
            }
            inner.running = true;
            inner.status.state = SchedulerState::Running;
        }
        // A fresh receiver sees only stop requests issued from now on.
        let _ = self.stop_tx.send(false);
        let mut stop_rx = self.stop_tx.subscribe();

        info!(
            subreddits = self.config.subreddits.len(),
            interval_minutes = self.config.interval_minutes,
            max_runs = ?max_runs,
            "scheduler started"
        );

        let mut runs_completed = 0u64;
        loop {
            self.run_once().await;
            runs_completed += 1;

            if let Some(max) = max_runs {
                if runs_completed >= max {
                    info!(max, "run budget exhausted, stopping");
                    break;
                }
            }

            if *stop_rx.borrow() {
                break;
            }

            let interval = Duration::from_secs(self.config.interval_minutes * 60);
            let next_run_at = Utc::now() + chrono::Duration::seconds(interval.as_secs() as i64);
            {
                let mut inner = self.inner.lock().unwrap();
                inner.status.next_run_at = Some(next_run_at);
            }
            info!(next_run_at = %next_run_at, "sleeping until next run");

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
            }
            if *stop_rx.borrow() {
                break;
            }
        }

        {
            let mut inner = self.inner.lock().unwrap();
            inner.running = false;
            inner.status.state = SchedulerState::Stopped;
            inner.status.next_run_at = None;
        }
        info!(runs_completed, "scheduler stopped");
    }

    /// Request a cooperative stop; the loop exits at the next boundary.
    /// Idempotent, and a no-op when nothing is running.
    pub fn stop(&self) {
        if !self.is_running() {
            warn!("scheduler is not running");
            return;
        }
        info!("scheduler stop requested");
        let _ = self.stop_tx.send(true);
    }

    /// Drop the run history and reset all counters.
    pub fn clear_history(&self) {
        let mut inner = self.inner.lock().unwrap();
        let running = inner.running;
        inner.history.clear();
        inner.run_count = 0;
        inner.status = SchedulerStatus {
            state: if running {
                SchedulerState::Running
            } else {
                SchedulerState::Idle
            },
            ..Default::default()
        };
        info!("scheduler history cleared");
    }
}
