use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

/// Sliding-window limits shared by every caller of one HTTP client.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests admitted per window.
    pub max_requests: u32,
    /// Maximum token cost admitted per window. Tokens approximate payload
    /// size and come from a caller hint (usually the requested item count).
    pub max_tokens: u32,
    /// Window length. Production configuration is one minute.
    pub time_window: Duration,
}

impl RateLimitConfig {
    pub fn per_minute(max_requests: u32, max_tokens: u32) -> Self {
        Self {
            max_requests,
            max_tokens,
            time_window: Duration::from_secs(60),
        }
    }

    /// Conservative defaults for unauthenticated scraping.
    pub fn reddit_scraping() -> Self {
        Self::per_minute(60, 10_000)
    }
}

#[derive(Debug, Default)]
struct Window {
    requests: VecDeque<Instant>,
    tokens: VecDeque<(Instant, u32)>,
    token_total: u64,
}

impl Window {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&front) = self.requests.front() {
            if now.duration_since(front) >= window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
        while let Some(&(front, cost)) = self.tokens.front() {
            if now.duration_since(front) >= window {
                self.tokens.pop_front();
                self.token_total -= cost as u64;
            } else {
                break;
            }
        }
    }
}

/// Dual sliding-window rate limiter (requests/window and tokens/window).
///
/// `acquire` blocks until both windows admit the request; bookkeeping is
/// serialized behind one async mutex.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    window: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            window: Mutex::new(Window::default()),
        }
    }

    /// Wait until the request and token windows both have room, then record
    /// the request. A cost larger than the whole token budget is clamped so
    /// oversized responses cannot wedge the limiter.
    pub async fn acquire(&self, tokens: u32) {
        let tokens = tokens.max(1).min(self.config.max_tokens);

        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                window.prune(now, self.config.time_window);

                let requests_ok = (window.requests.len() as u32) < self.config.max_requests;
                let tokens_ok =
                    window.token_total + tokens as u64 <= self.config.max_tokens as u64;

                if requests_ok && tokens_ok {
                    window.requests.push_back(now);
                    window.tokens.push_back((now, tokens));
                    window.token_total += tokens as u64;
                    return;
                }

                // Sleep until the oldest blocking entry ages out.
                let mut oldest: Option<Instant> = None;
                if !requests_ok {
                    oldest = window.requests.front().copied();
                }
                if !tokens_ok {
                    let token_front = window.tokens.front().map(|&(at, _)| at);
                    oldest = match (oldest, token_front) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };
                }

                match oldest {
                    Some(at) => self
                        .config
                        .time_window
                        .saturating_sub(now.duration_since(at))
                        .max(Duration::from_millis(10)),
                    None => Duration::from_millis(50),
                }
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            sleep(wait).await;
        }
    }

    pub async fn status(&self) -> RateLimitStatus {
        let mut window = self.window.lock().await;
        window.prune(Instant::now(), self.config.time_window);

        RateLimitStatus {
            window_requests: window.requests.len() as u32,
            max_requests: self.config.max_requests,
            window_tokens: window.token_total,
            max_tokens: self.config.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub window_requests: u32,
    pub max_requests: u32,
    pub window_tokens: u64,
    pub max_tokens: u32,
}

impl RateLimitStatus {
    pub fn requests_remaining(&self) -> u32 {
        self.max_requests.saturating_sub(self.window_requests)
    }

    pub fn is_near_limit(&self) -> bool {
        self.window_requests as f64 >= self.max_requests as f64 * 0.8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_window(max_requests: u32, max_tokens: u32) -> RateLimitConfig {
        RateLimitConfig {
            max_requests,
            max_tokens,
            time_window: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn acquires_immediately_under_the_limit() {
        let limiter = RateLimiter::new(short_window(5, 100));

        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire(1).await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));

        let status = limiter.status().await;
        assert_eq!(status.window_requests, 5);
        assert_eq!(status.requests_remaining(), 0);
    }

    #[tokio::test]
    async fn blocks_when_request_window_is_full() {
        let limiter = RateLimiter::new(short_window(2, 100));

        limiter.acquire(1).await;
        limiter.acquire(1).await;

        let start = Instant::now();
        limiter.acquire(1).await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn blocks_when_token_budget_is_exhausted() {
        let limiter = RateLimiter::new(short_window(10, 10));

        limiter.acquire(10).await;

        let start = Instant::now();
        limiter.acquire(1).await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn oversized_cost_is_clamped_to_the_budget() {
        let limiter = RateLimiter::new(short_window(10, 10));

        // Must not wedge even though 500 > max_tokens.
        limiter.acquire(500).await;
        let status = limiter.status().await;
        assert_eq!(status.window_tokens, 10);
    }

    #[tokio::test]
    async fn near_limit_flag_tracks_the_request_window() {
        let limiter = RateLimiter::new(short_window(10, 1000));
        for _ in 0..8 {
            limiter.acquire(1).await;
        }
        assert!(limiter.status().await.is_near_limit());
    }
}
