use alerts::{
    AlertEngine, ConsoleNotifier, DiscordNotifier, EmailNotifier, SlackNotifier, WebhookNotifier,
};
use database::Database;
use pipeline::{collector::sort_or_hot, Collector, DataPipeline, ScheduleConfig, SimpleScheduler};
use reddit_client::{
    ApiCredentials, RateLimitConfig, RateLimiter, RedditApiClient, RedditScraper, ScrapingClient,
    SourceBackend, UnifiedDataSource,
};
use redwatch_core::{AppConfig, CoreError, TimeFilter};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use streaming::{LiveUpdateKind, MonitorConfig, MonitorRegistry, SubredditMonitor};

#[tokio::main]
async fn main() -> Result<(), CoreError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "redwatch=info,redwatch_core=info,reddit_client=info,database=info,\
                     pipeline=info,streaming=info,alerts=info",
                )
            }),
        )
        .init();

    tracing::info!("Starting Redwatch - Reddit ingestion and monitoring");

    let config = AppConfig::from_env()?;
    let db = Database::connect(&config.database_url).await?;

    // One rate limiter shared by both backends of the unified source.
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::per_minute(
        config.requests_per_minute,
        config.tokens_per_minute,
    )));

    let scraping_client = Arc::new(ScrapingClient::new(limiter.clone())?);
    let scraper: Arc<dyn SourceBackend> = Arc::new(RedditScraper::new(
        scraping_client,
        config.scraper_base_url.clone(),
    ));

    let api: Option<Arc<dyn SourceBackend>> =
        match (&config.reddit_client_id, &config.reddit_client_secret) {
            (Some(client_id), Some(client_secret)) => {
                let client = RedditApiClient::new(
                    ApiCredentials {
                        client_id: client_id.clone(),
                        client_secret: client_secret.clone(),
                    },
                    config.user_agent.clone(),
                    limiter.clone(),
                )?;
                Some(Arc::new(client))
            }
            _ => {
                tracing::info!("no Reddit API credentials configured, scraping only");
                None
            }
        };

    let strategy = config.source_strategy.parse().unwrap_or_default();
    let source = Arc::new(UnifiedDataSource::new(api, scraper, strategy));

    // Alert engine with whatever channels are configured.
    let engine = Arc::new(AlertEngine::new(
        config.alert_max_history,
        config.alert_cooldown_minutes,
    ));
    engine.register_notifier("console", Arc::new(ConsoleNotifier::new(true)));
    if let Some(smtp) = config.smtp.clone() {
        engine.register_notifier("email", Arc::new(EmailNotifier::new(smtp)));
    }
    if let Some(url) = config.webhook_url.clone() {
        engine.register_notifier("webhook", Arc::new(WebhookNotifier::new(Some(url))));
    }
    if let Some(slack) = config.slack.clone() {
        engine.register_notifier(
            "slack",
            Arc::new(SlackNotifier::new(
                Some(slack.webhook_url),
                slack.channel,
                slack.username,
                slack.icon_emoji,
            )),
        );
    }
    if let Some(discord) = config.discord.clone() {
        engine.register_notifier(
            "discord",
            Arc::new(DiscordNotifier::new(
                Some(discord.webhook_url),
                discord.username,
            )),
        );
    }

    // Live monitors for the configured subreddits; others start lazily
    // when an SSE client asks for them.
    let registry = Arc::new(MonitorRegistry::new(
        source.clone(),
        MonitorConfig {
            interval: Duration::from_secs(config.monitor_interval_secs),
            max_posts_per_poll: config.monitor_max_posts,
            spike_threshold: config.spike_threshold,
            activity_window: config.activity_window,
        },
    ));
    for subreddit in &config.subreddits {
        let monitor = registry.ensure_monitor(subreddit);
        spawn_alert_bridge(monitor, engine.clone());
    }

    // Scheduled collection.
    let collector = Collector::new(DataPipeline::new(db.clone()), source.clone());
    let schedule = ScheduleConfig {
        subreddits: config.subreddits.clone(),
        interval_minutes: config.interval_minutes,
        sort: sort_or_hot(&config.sort),
        limit: config.limit,
        include_comments: config.include_comments,
        comment_limit: config.comment_limit,
        time_filter: config
            .time_filter
            .parse()
            .unwrap_or(TimeFilter::Week),
    };
    let scheduler = Arc::new(SimpleScheduler::new(collector, schedule));
    let scheduler_task = if config.subreddits.is_empty() {
        tracing::warn!("no subreddits configured, scheduler idle");
        None
    } else {
        let scheduler = scheduler.clone();
        Some(tokio::spawn(async move {
            scheduler.start(None).await;
        }))
    };

    // SSE surface.
    let app = streaming::sse::router(registry.clone());
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!(address = %config.bind_address, "SSE server listening");

    tokio::select! {
        result = axum::serve(listener, app) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    scheduler.stop();
    registry.stop_all();
    if let Some(task) = scheduler_task {
        task.abort();
    }
    db.close().await;

    tracing::info!("Redwatch stopped");
    Ok(())
}

/// Forward monitor spikes into the alert engine as metric checks.
fn spawn_alert_bridge(monitor: Arc<SubredditMonitor>, engine: Arc<AlertEngine>) {
    let mut subscription = monitor.subscribe();
    tokio::spawn(async move {
        while let Some(update) = subscription.recv().await {
            if update.kind != LiveUpdateKind::ActivitySpike {
                continue;
            }

            let mut metrics: HashMap<String, f64> = HashMap::new();
            for key in ["current_rate", "baseline_rate", "spike_factor"] {
                if let Some(value) = update.data.get(key).and_then(|v| v.as_f64()) {
                    metrics.insert(key.to_string(), value);
                }
            }

            for alert in engine.check_rules(&update.subreddit, &metrics, None) {
                engine.process_alert(alert).await;
            }
        }
    });
}
