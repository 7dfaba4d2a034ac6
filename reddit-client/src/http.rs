use redwatch_core::{CoreError, SourceError};
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Response};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::rate_limiter::RateLimiter;

/// Common browser User-Agent strings, rotated per request.
pub const USER_AGENTS: [&str; 12] = [
    // Chrome (Windows)
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    // Chrome (macOS)
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    // Firefox (Windows)
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
    // Firefox (macOS)
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:120.0) Gecko/20100101 Firefox/120.0",
    // Safari (macOS)
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    // Edge (Windows)
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36 Edg/119.0.0.0",
];

/// Fraction of requests that pick a random User-Agent instead of the next
/// one in sequence, to defeat strict rotation-pattern detectors.
const RANDOM_UA_RATIO: f64 = 0.2;

const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Exponential backoff: `base · 2^attempt`.
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt)
}

/// `Retry-After` header in seconds, defaulting when absent or malformed.
pub(crate) fn retry_after_seconds(headers: &HeaderMap) -> u64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// HTTP client for the unauthenticated JSON endpoints.
///
/// Wraps reqwest with User-Agent rotation, a realistic browser header
/// bundle, rate limiting, and retry with exponential backoff.
#[derive(Debug)]
pub struct ScrapingClient {
    client: Client,
    rate_limiter: Arc<RateLimiter>,
    max_retries: u32,
    base_delay: Duration,
    ua_index: AtomicUsize,
}

impl ScrapingClient {
    pub fn new(rate_limiter: Arc<RateLimiter>) -> Result<Self, CoreError> {
        Self::with_retries(rate_limiter, 3, Duration::from_secs(1))
    }

    pub fn with_retries(
        rate_limiter: Arc<RateLimiter>,
        max_retries: u32,
        base_delay: Duration,
    ) -> Result<Self, CoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(CoreError::Network)?;

        Ok(Self {
            client,
            rate_limiter,
            max_retries,
            base_delay,
            ua_index: AtomicUsize::new(0),
        })
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    fn rotate_user_agent(&self) -> &'static str {
        if fastrand::f64() < RANDOM_UA_RATIO {
            return USER_AGENTS[fastrand::usize(..USER_AGENTS.len())];
        }
        let index = self.ua_index.fetch_add(1, Ordering::Relaxed);
        USER_AGENTS[index % USER_AGENTS.len()]
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(self.rotate_user_agent()));
        headers.insert(
            "Accept",
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert("Accept-Language", HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert("DNT", HeaderValue::from_static("1"));
        headers.insert("Connection", HeaderValue::from_static("keep-alive"));
        headers.insert(
            "Upgrade-Insecure-Requests",
            HeaderValue::from_static("1"),
        );
        headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
        headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
        headers.insert("Sec-Fetch-Site", HeaderValue::from_static("none"));
        headers.insert("Sec-Fetch-User", HeaderValue::from_static("?1"));
        headers.insert("Cache-Control", HeaderValue::from_static("max-age=0"));
        headers
    }

    /// Issue a GET with rate limiting and retries.
    ///
    /// 429 responses honor `Retry-After` and do not consume the retry
    /// budget; 5xx and transport failures back off exponentially; other 4xx
    /// responses are returned to the caller untouched.
    pub async fn get(
        &self,
        url: &str,
        params: &[(&str, String)],
        cost: u32,
    ) -> Result<Response, CoreError> {
        let mut attempt = 0u32;
        let mut last_error: Option<String> = None;
        let mut last_status: Option<u16> = None;

        while attempt < self.max_retries {
            self.rate_limiter.acquire(cost).await;

            let request = self.client.get(url).headers(self.headers()).query(params);

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.as_u16() == 429 {
                        let wait = retry_after_seconds(response.headers());
                        warn!(
                            url,
                            wait_secs = wait,
                            "rate limited (429), honoring Retry-After"
                        );
                        sleep(Duration::from_secs(wait)).await;
                        continue;
                    }

                    if status.is_server_error() {
                        let delay = backoff_delay(self.base_delay, attempt);
                        warn!(
                            url,
                            status = status.as_u16(),
                            attempt = attempt + 1,
                            max = self.max_retries,
                            "server error, retrying"
                        );
                        last_status = Some(status.as_u16());
                        last_error = Some(format!("server error ({status})"));
                        attempt += 1;
                        if attempt < self.max_retries {
                            sleep(delay).await;
                        }
                        continue;
                    }

                    debug!(url, status = status.as_u16(), "request completed");
                    return Ok(response);
                }
                Err(e) => {
                    let delay = backoff_delay(self.base_delay, attempt);
                    warn!(
                        url,
                        error = %e,
                        attempt = attempt + 1,
                        max = self.max_retries,
                        "request error, retrying"
                    );
                    last_error = Some(if e.is_timeout() {
                        "request timeout".to_string()
                    } else {
                        e.to_string()
                    });
                    attempt += 1;
                    if attempt < self.max_retries {
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(SourceError::Scraping {
            message: format!(
                "request failed after {} attempts: {}",
                self.max_retries,
                last_error.unwrap_or_else(|| "unknown error".to_string())
            ),
            status_code: last_status,
        }
        .into())
    }

    /// GET a JSON document; any non-200 status is an error.
    pub async fn get_json(
        &self,
        url: &str,
        params: &[(&str, String)],
        cost: u32,
    ) -> Result<Value, CoreError> {
        let response = self.get(url, params, cost).await?;
        let status = response.status();

        if status.as_u16() != 200 {
            return Err(SourceError::Scraping {
                message: format!("request failed with status {}", status.as_u16()),
                status_code: Some(status.as_u16()),
            }
            .into());
        }

        response.json::<Value>().await.map_err(|e| {
            SourceError::Scraping {
                message: format!("failed to parse JSON: {e}"),
                status_code: None,
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::RateLimitConfig;

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(4000));
    }

    #[test]
    fn retry_after_parses_seconds_with_default() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_seconds(&headers), 60);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("17"));
        assert_eq!(retry_after_seconds(&headers), 17);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("not-a-number"));
        assert_eq!(retry_after_seconds(&headers), 60);
    }

    #[test]
    fn user_agent_rotation_cycles_the_pool() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::reddit_scraping()));
        let client = ScrapingClient::new(limiter).unwrap();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(client.rotate_user_agent());
        }
        // With 200 draws the full pool shows up in practice.
        assert_eq!(seen.len(), USER_AGENTS.len());
    }
}
