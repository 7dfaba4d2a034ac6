//! SSE surface over the monitor subscriptions.
//!
//! `GET /stream/{subreddit}` subscribes the client to that subreddit's
//! monitor (starting it on first use) and relays every update envelope as
//! a JSON-encoded SSE event named after the update kind. `GET /monitors`
//! reports what is currently being watched.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::debug;

use crate::monitor::Subscription;
use crate::registry::{MonitorInfo, MonitorRegistry};

pub fn router(registry: Arc<MonitorRegistry>) -> Router {
    Router::new()
        .route("/stream/{subreddit}", get(stream_subreddit))
        .route("/monitors", get(list_monitors))
        .with_state(registry)
}

async fn stream_subreddit(
    Path(subreddit): Path<String>,
    State(registry): State<Arc<MonitorRegistry>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(subreddit, "SSE client connected");
    let monitor = registry.ensure_monitor(&subreddit);
    let subscription = monitor.subscribe();

    // When the client goes away the receiver drops; the monitor notices on
    // its next broadcast and unsubscribes the queue.
    let stream = futures::stream::unfold(subscription, |mut sub: Subscription| async move {
        let update = sub.recv().await?;
        let event = Event::default()
            .event(update.kind.as_str())
            .json_data(&update)
            .ok()?;
        Some((Ok::<_, Infallible>(event), sub))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn list_monitors(State(registry): State<Arc<MonitorRegistry>>) -> Json<Vec<MonitorInfo>> {
    Json(registry.list())
}
