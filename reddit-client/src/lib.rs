pub mod api;
pub mod http;
pub mod parser;
pub mod rate_limiter;
pub mod scraper;
pub mod source;

pub use api::{ApiCredentials, RedditApiClient};
pub use http::ScrapingClient;
pub use rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
pub use scraper::RedditScraper;
pub use source::{SourceBackend, SourceStatus, SourceStrategy, UnifiedDataSource};
