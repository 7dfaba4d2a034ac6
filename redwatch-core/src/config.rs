use std::env;
use std::str::FromStr;

use crate::error::{ConfigError, CoreError};

/// SMTP settings for the email notifier.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_addr: String,
    pub use_tls: bool,
}

/// Slack incoming-webhook settings.
#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub webhook_url: String,
    pub channel: Option<String>,
    pub username: String,
    pub icon_emoji: String,
}

/// Discord webhook settings.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub webhook_url: String,
    pub username: String,
}

/// Application configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Reddit backends
    pub reddit_client_id: Option<String>,
    pub reddit_client_secret: Option<String>,
    pub user_agent: String,
    pub scraper_base_url: String,
    pub source_strategy: String,

    // Rate limiter
    pub requests_per_minute: u32,
    pub tokens_per_minute: u32,

    // Persistence
    pub database_url: String,

    // Scheduler
    pub subreddits: Vec<String>,
    pub interval_minutes: u64,
    pub sort: String,
    pub limit: usize,
    pub include_comments: bool,
    pub comment_limit: usize,
    pub time_filter: String,

    // Monitor
    pub monitor_interval_secs: u64,
    pub monitor_max_posts: usize,
    pub spike_threshold: f64,
    pub activity_window: usize,

    // Alerts
    pub alert_max_history: usize,
    pub alert_cooldown_minutes: i64,
    pub smtp: Option<SmtpConfig>,
    pub webhook_url: Option<String>,
    pub slack: Option<SlackConfig>,
    pub discord: Option<DiscordConfig>,

    // SSE server
    pub bind_address: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            reddit_client_id: None,
            reddit_client_secret: None,
            user_agent: "redwatch/0.1".to_string(),
            scraper_base_url: "https://old.reddit.com".to_string(),
            source_strategy: "api_first".to_string(),
            requests_per_minute: 60,
            tokens_per_minute: 10_000,
            database_url: "sqlite://redwatch.db".to_string(),
            subreddits: Vec::new(),
            interval_minutes: 60,
            sort: "hot".to_string(),
            limit: 100,
            include_comments: false,
            comment_limit: 50,
            time_filter: "week".to_string(),
            monitor_interval_secs: 30,
            monitor_max_posts: 25,
            spike_threshold: 2.0,
            activity_window: 10,
            alert_max_history: 1000,
            alert_cooldown_minutes: 5,
            smtp: None,
            webhook_url: None,
            slack: None,
            discord: None,
            bind_address: "127.0.0.1:8000".to_string(),
        }
    }
}

fn get(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match get(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            field: name.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

impl AppConfig {
    /// Read configuration from `REDWATCH_*` (and Reddit credential)
    /// environment variables, falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, CoreError> {
        let defaults = AppConfig::default();

        let subreddits = get("REDWATCH_SUBREDDITS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let interval_minutes = parse("REDWATCH_INTERVAL_MINUTES", defaults.interval_minutes)?;
        if interval_minutes < 1 {
            return Err(ConfigError::InvalidValue {
                field: "REDWATCH_INTERVAL_MINUTES".to_string(),
                value: interval_minutes.to_string(),
            }
            .into());
        }

        let smtp = match (get("REDWATCH_SMTP_HOST"), get("REDWATCH_SMTP_FROM")) {
            (Some(host), Some(from_addr)) => Some(SmtpConfig {
                host,
                port: parse("REDWATCH_SMTP_PORT", 587)?,
                username: get("REDWATCH_SMTP_USERNAME").unwrap_or_default(),
                password: get("REDWATCH_SMTP_PASSWORD").unwrap_or_default(),
                from_addr,
                use_tls: parse("REDWATCH_SMTP_USE_TLS", true)?,
            }),
            _ => None,
        };

        let slack = get("REDWATCH_SLACK_WEBHOOK_URL").map(|webhook_url| SlackConfig {
            webhook_url,
            channel: get("REDWATCH_SLACK_CHANNEL"),
            username: get("REDWATCH_SLACK_USERNAME")
                .unwrap_or_else(|| "Redwatch Bot".to_string()),
            icon_emoji: get("REDWATCH_SLACK_ICON").unwrap_or_else(|| ":bell:".to_string()),
        });

        let discord = get("REDWATCH_DISCORD_WEBHOOK_URL").map(|webhook_url| DiscordConfig {
            webhook_url,
            username: get("REDWATCH_DISCORD_USERNAME").unwrap_or_else(|| "Redwatch".to_string()),
        });

        Ok(Self {
            reddit_client_id: get("REDDIT_CLIENT_ID"),
            reddit_client_secret: get("REDDIT_CLIENT_SECRET"),
            user_agent: get("REDWATCH_USER_AGENT").unwrap_or(defaults.user_agent),
            scraper_base_url: get("REDWATCH_BASE_URL").unwrap_or(defaults.scraper_base_url),
            source_strategy: get("REDWATCH_STRATEGY").unwrap_or(defaults.source_strategy),
            requests_per_minute: parse(
                "REDWATCH_REQUESTS_PER_MINUTE",
                defaults.requests_per_minute,
            )?,
            tokens_per_minute: parse("REDWATCH_TOKENS_PER_MINUTE", defaults.tokens_per_minute)?,
            database_url: get("REDWATCH_DATABASE_URL").unwrap_or(defaults.database_url),
            subreddits,
            interval_minutes,
            sort: get("REDWATCH_SORT").unwrap_or(defaults.sort),
            limit: parse("REDWATCH_LIMIT", defaults.limit)?,
            include_comments: parse("REDWATCH_INCLUDE_COMMENTS", defaults.include_comments)?,
            comment_limit: parse("REDWATCH_COMMENT_LIMIT", defaults.comment_limit)?,
            time_filter: get("REDWATCH_TIME_FILTER").unwrap_or(defaults.time_filter),
            monitor_interval_secs: parse(
                "REDWATCH_MONITOR_INTERVAL_SECS",
                defaults.monitor_interval_secs,
            )?,
            monitor_max_posts: parse("REDWATCH_MONITOR_MAX_POSTS", defaults.monitor_max_posts)?,
            spike_threshold: parse("REDWATCH_SPIKE_THRESHOLD", defaults.spike_threshold)?,
            activity_window: parse("REDWATCH_ACTIVITY_WINDOW", defaults.activity_window)?,
            alert_max_history: parse("REDWATCH_ALERT_MAX_HISTORY", defaults.alert_max_history)?,
            alert_cooldown_minutes: parse(
                "REDWATCH_ALERT_COOLDOWN_MINUTES",
                defaults.alert_cooldown_minutes,
            )?,
            smtp,
            webhook_url: get("REDWATCH_WEBHOOK_URL"),
            slack,
            discord,
            bind_address: get("REDWATCH_BIND_ADDRESS").unwrap_or(defaults.bind_address),
        })
    }

    /// Whether API credentials are available for the authenticated backend.
    pub fn has_api_credentials(&self) -> bool {
        self.reddit_client_id.is_some() && self.reddit_client_secret.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.monitor_interval_secs, 30);
        assert_eq!(config.monitor_max_posts, 25);
        assert_eq!(config.spike_threshold, 2.0);
        assert_eq!(config.activity_window, 10);
        assert_eq!(config.alert_max_history, 1000);
        assert_eq!(config.alert_cooldown_minutes, 5);
        assert!(!config.has_api_credentials());
    }
}
