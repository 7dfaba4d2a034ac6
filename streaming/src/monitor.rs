//! Per-subreddit polling monitor with fan-out push channels.
//!
//! One asynchronous task per monitor polls the unified source for new
//! posts, diffs them against a bounded seen-id set, and broadcasts updates
//! to every subscriber queue. Slow or vanished consumers are unsubscribed
//! on the first failed send so producers never block.

use chrono::{DateTime, Utc};
use redwatch_core::Post;
use reddit_client::UnifiedDataSource;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Bound of each subscriber queue. A full queue counts as a dead
/// subscriber: the producer drops the update and unsubscribes it.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

/// Seen-id set cap; on overflow the set is rebuilt from the newest posts.
const SEEN_IDS_CAP: usize = 1000;
const SEEN_IDS_KEEP: usize = 500;

/// Per-poll ceiling on NEW_POST emissions, protecting slow subscribers.
const MAX_NEW_POST_UPDATES: usize = 10;

/// Kinds of live updates pushed to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveUpdateKind {
    NewPost,
    ActivitySpike,
    KeywordSurge,
    Status,
}

impl LiveUpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LiveUpdateKind::NewPost => "new_post",
            LiveUpdateKind::ActivitySpike => "activity_spike",
            LiveUpdateKind::KeywordSurge => "keyword_surge",
            LiveUpdateKind::Status => "status",
        }
    }
}

/// The update envelope serialized onto the SSE stream.
#[derive(Debug, Clone, Serialize)]
pub struct LiveUpdate {
    #[serde(rename = "type")]
    pub kind: LiveUpdateKind,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
    pub subreddit: String,
}

impl LiveUpdate {
    pub fn new_post(post: &Post, subreddit: &str) -> Self {
        Self {
            kind: LiveUpdateKind::NewPost,
            timestamp: Utc::now(),
            data: json!({
                "id": post.id,
                "title": post.title,
                "author": post.author,
                "score": post.score,
                "num_comments": post.num_comments,
                "url": post.url,
                "created_utc": post.created_utc.to_rfc3339(),
            }),
            subreddit: subreddit.to_string(),
        }
    }

    pub fn activity_spike(
        subreddit: &str,
        current_rate: f64,
        baseline_rate: f64,
        spike_factor: f64,
    ) -> Self {
        let round2 = |v: f64| (v * 100.0).round() / 100.0;
        Self {
            kind: LiveUpdateKind::ActivitySpike,
            timestamp: Utc::now(),
            data: json!({
                "current_rate": round2(current_rate),
                "baseline_rate": round2(baseline_rate),
                "spike_factor": round2(spike_factor),
                "message": format!("Activity {spike_factor:.1}x higher than baseline"),
            }),
            subreddit: subreddit.to_string(),
        }
    }

    pub fn status(message: &str, subreddit: &str) -> Self {
        Self {
            kind: LiveUpdateKind::Status,
            timestamp: Utc::now(),
            data: json!({ "message": message }),
            subreddit: subreddit.to_string(),
        }
    }
}

/// Rolling window of per-poll new-post counts with spike detection.
#[derive(Debug)]
pub struct ActivityTracker {
    window_size: usize,
    spike_threshold: f64,
    counts: VecDeque<usize>,
}

impl ActivityTracker {
    pub fn new(window_size: usize, spike_threshold: f64) -> Self {
        Self {
            window_size: window_size.max(1),
            spike_threshold,
            counts: VecDeque::with_capacity(window_size),
        }
    }

    /// Record one poll's new-post count and report whether it spikes.
    ///
    /// The baseline is the mean of the window *before* this count is
    /// recorded; fewer than three samples never spike. A spike needs both
    /// the ratio ≥ threshold and an absolute floor of 2 posts.
    pub fn record(&mut self, count: usize) -> (bool, f64) {
        if self.counts.len() < 3 {
            self.push(count);
            return (false, 1.0);
        }

        let baseline = self.baseline();
        let spike_factor = if baseline > 0.0 {
            count as f64 / baseline
        } else if count > 0 {
            count as f64
        } else {
            1.0
        };

        self.push(count);

        let is_spike = spike_factor >= self.spike_threshold && count >= 2;
        (is_spike, spike_factor)
    }

    /// Mean per-poll count over the current window.
    pub fn baseline(&self) -> f64 {
        if self.counts.is_empty() {
            return 0.0;
        }
        self.counts.iter().sum::<usize>() as f64 / self.counts.len() as f64
    }

    fn push(&mut self, count: usize) {
        if self.counts.len() == self.window_size {
            self.counts.pop_front();
        }
        self.counts.push_back(count);
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new(10, 2.0)
    }
}

/// Monitor tuning knobs.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub max_posts_per_poll: usize,
    pub spike_threshold: f64,
    pub activity_window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_posts_per_poll: 25,
            spike_threshold: 2.0,
            activity_window: 10,
        }
    }
}

/// A subscription handle. Dropping the receiver (or the handle) makes the
/// next broadcast fail for this queue, which unsubscribes it; `id` also
/// allows an explicit, idempotent [`SubredditMonitor::unsubscribe`].
pub struct Subscription {
    pub id: u64,
    receiver: mpsc::Receiver<LiveUpdate>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<LiveUpdate> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LiveUpdate> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Default)]
struct MonitorState {
    seen_ids: HashSet<String>,
    subscribers: Vec<(u64, mpsc::Sender<LiveUpdate>)>,
}

/// Polls one subreddit for new posts and pushes updates to subscribers.
pub struct SubredditMonitor {
    subreddit: String,
    source: Arc<UnifiedDataSource>,
    config: MonitorConfig,
    state: Mutex<MonitorState>,
    tracker: Mutex<ActivityTracker>,
    running: AtomicBool,
    next_subscriber_id: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubredditMonitor {
    pub fn new(
        subreddit: impl Into<String>,
        source: Arc<UnifiedDataSource>,
        config: MonitorConfig,
    ) -> Arc<Self> {
        let subreddit = subreddit.into();
        info!(
            subreddit,
            interval_secs = config.interval.as_secs(),
            "monitor created"
        );
        Arc::new(Self {
            tracker: Mutex::new(ActivityTracker::new(
                config.activity_window,
                config.spike_threshold,
            )),
            subreddit,
            source,
            config,
            state: Mutex::new(MonitorState::default()),
            running: AtomicBool::new(false),
            next_subscriber_id: AtomicU64::new(0),
            task: Mutex::new(None),
        })
    }

    pub fn subreddit(&self) -> &str {
        &self.subreddit
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().unwrap().subscribers.len()
    }

    /// Start the polling task. Idempotent; the first poll runs
    /// immediately after the started status is announced.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(subreddit = %self.subreddit, "monitor already running");
            return;
        }

        info!(subreddit = %self.subreddit, "starting monitor");
        self.broadcast(LiveUpdate::status(
            &format!("Started monitoring r/{}", self.subreddit),
            &self.subreddit,
        ));

        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                match monitor.check_updates().await {
                    Ok(updates) => {
                        for update in updates {
                            monitor.broadcast(update);
                        }
                    }
                    Err(e) => {
                        error!(subreddit = %monitor.subreddit, error = %e, "monitor poll failed");
                        let truncated: String = e.to_string().chars().take(100).collect();
                        monitor.broadcast(LiveUpdate::status(
                            &format!("Error: {truncated}"),
                            &monitor.subreddit,
                        ));
                    }
                }

                tokio::time::sleep(monitor.config.interval).await;

                if !monitor.running.load(Ordering::SeqCst) {
                    break;
                }
            }
        });

        *self.task.lock().unwrap() = Some(handle);
    }

    /// Announce the stop to subscribers and cancel the polling task.
    /// Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!(subreddit = %self.subreddit, "stopping monitor");
        self.broadcast(LiveUpdate::status(
            &format!("Stopped monitoring r/{}", self.subreddit),
            &self.subreddit,
        ));

        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Register a new subscriber queue.
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        state.subscribers.push((id, sender));
        debug!(
            subreddit = %self.subreddit,
            total = state.subscribers.len(),
            "new subscriber"
        );

        Subscription { id, receiver }
    }

    /// Remove a subscriber by id. Safe to call more than once.
    pub fn unsubscribe(&self, id: u64) {
        let mut state = self.state.lock().unwrap();
        let before = state.subscribers.len();
        state.subscribers.retain(|(sub_id, _)| *sub_id != id);
        if state.subscribers.len() != before {
            debug!(
                subreddit = %self.subreddit,
                remaining = state.subscribers.len(),
                "subscriber removed"
            );
        }
    }

    /// One poll: fetch newest posts, emit NEW_POST updates for unseen ones
    /// (source order, capped per poll), then the spike update if flagged.
    async fn check_updates(&self) -> Result<Vec<LiveUpdate>, redwatch_core::CoreError> {
        let posts = self
            .source
            .get_new_posts(&self.subreddit, self.config.max_posts_per_poll)
            .await?;

        let mut updates = Vec::new();
        if posts.is_empty() {
            return Ok(updates);
        }

        let new_posts: Vec<&Post> = {
            let mut state = self.state.lock().unwrap();
            let fresh: Vec<&Post> = posts
                .iter()
                .filter(|post| state.seen_ids.insert(post.id.clone()))
                .collect();

            if state.seen_ids.len() > SEEN_IDS_CAP {
                state.seen_ids = posts
                    .iter()
                    .take(SEEN_IDS_KEEP)
                    .map(|post| post.id.clone())
                    .collect();
            }
            fresh
        };

        for post in new_posts.iter().take(MAX_NEW_POST_UPDATES) {
            updates.push(LiveUpdate::new_post(post, &self.subreddit));
        }

        let (is_spike, spike_factor) = self.tracker.lock().unwrap().record(new_posts.len());
        if is_spike {
            let interval_minutes = self.config.interval.as_secs_f64() / 60.0;
            let baseline = self.tracker.lock().unwrap().baseline();
            updates.push(LiveUpdate::activity_spike(
                &self.subreddit,
                new_posts.len() as f64 / interval_minutes,
                baseline / interval_minutes,
                spike_factor,
            ));
        }

        debug!(
            subreddit = %self.subreddit,
            new_posts = new_posts.len(),
            updates = updates.len(),
            "poll completed"
        );
        Ok(updates)
    }

    /// Best-effort fan-out. The send is non-blocking; a full or closed
    /// queue marks the subscriber dead and removes it.
    fn broadcast(&self, update: LiveUpdate) {
        let mut state = self.state.lock().unwrap();
        state.subscribers.retain(|(id, sender)| {
            match sender.try_send(update.clone()) {
                Ok(()) => true,
                Err(e) => {
                    debug!(
                        subreddit = %self.subreddit,
                        subscriber = id,
                        error = %e,
                        "dropping dead subscriber"
                    );
                    false
                }
            }
        });
    }
}
