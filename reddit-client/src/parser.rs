//! Decoding of the Reddit JSON envelope.
//!
//! Responses are wrapped in typed "things": a `Listing` container with
//! paginated `children`, `t3` submissions, `t1` comments, `t5` subreddits,
//! and `more` continuation markers. Comments arrive as a nested reply tree
//! that gets flattened depth-first here.

use chrono::{DateTime, Utc};
use redwatch_core::{Comment, Post, SubredditInfo};
use serde_json::Value;
use tracing::{debug, warn};

pub const KIND_LISTING: &str = "Listing";
pub const KIND_POST: &str = "t3";
pub const KIND_COMMENT: &str = "t1";
pub const KIND_SUBREDDIT: &str = "t5";
pub const KIND_MORE: &str = "more";

const DELETED_BODIES: [&str; 2] = ["[deleted]", "[removed]"];

fn kind_of(value: &Value) -> Option<&str> {
    value.get("kind").and_then(Value::as_str)
}

fn str_field(data: &Value, field: &str) -> String {
    data.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn i64_field(data: &Value, field: &str) -> i64 {
    data.get(field).and_then(Value::as_i64).unwrap_or(0)
}

fn bool_field(data: &Value, field: &str) -> bool {
    data.get(field).and_then(Value::as_bool).unwrap_or(false)
}

fn timestamp_field(data: &Value, field: &str) -> DateTime<Utc> {
    let secs = data.get(field).and_then(Value::as_f64).unwrap_or(0.0);
    DateTime::from_timestamp(secs as i64, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Children of a `Listing` envelope; malformed input yields an empty slice.
pub fn listing_children(value: &Value) -> &[Value] {
    match kind_of(value) {
        Some(KIND_LISTING) => {}
        other => {
            warn!(kind = ?other, "expected Listing envelope");
            return &[];
        }
    }

    value
        .get("data")
        .and_then(|data| data.get("children"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Pagination cursor of a `Listing`, when present.
pub fn after_token(value: &Value) -> Option<String> {
    value
        .get("data")
        .and_then(|data| data.get("after"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Decode one `t3` child into a [`Post`]. Returns `None` (logging the
/// reason) for anything that is not a well-formed submission.
pub fn parse_post(child: &Value) -> Option<Post> {
    if kind_of(child) != Some(KIND_POST) {
        debug!(kind = ?kind_of(child), "expected t3 (post)");
        return None;
    }

    let data = child.get("data")?;
    let id = str_field(data, "id");
    if id.is_empty() {
        warn!("dropping post without id");
        return None;
    }

    let author = match data.get("author").and_then(Value::as_str) {
        Some(name) => name.to_string(),
        None => "[deleted]".to_string(),
    };

    let mut permalink = str_field(data, "permalink");
    if !permalink.is_empty() && !permalink.starts_with("http") {
        permalink = format!("https://reddit.com{permalink}");
    }

    Some(Post {
        id,
        title: str_field(data, "title"),
        selftext: str_field(data, "selftext"),
        author,
        subreddit: str_field(data, "subreddit"),
        score: i64_field(data, "score"),
        num_comments: i64_field(data, "num_comments"),
        created_utc: timestamp_field(data, "created_utc"),
        url: str_field(data, "url"),
        permalink,
        is_self: bool_field(data, "is_self"),
    })
}

/// Decode one `t1` child into a [`Comment`].
///
/// Comments whose body is a deletion marker are dropped here, at parse
/// time, so they never reach the pipeline.
pub fn parse_comment(child: &Value) -> Option<Comment> {
    if kind_of(child) != Some(KIND_COMMENT) {
        debug!(kind = ?kind_of(child), "expected t1 (comment)");
        return None;
    }

    let data = child.get("data")?;
    let body = str_field(data, "body");
    if DELETED_BODIES.contains(&body.as_str()) {
        debug!(id = %str_field(data, "id"), "skipping deleted/removed comment");
        return None;
    }

    let id = str_field(data, "id");
    if id.is_empty() {
        warn!("dropping comment without id");
        return None;
    }

    let author = match data.get("author").and_then(Value::as_str) {
        Some(name) => name.to_string(),
        None => "[deleted]".to_string(),
    };

    // link_id carries the parent submission as a fullname ("t3_<id>").
    let link_id = str_field(data, "link_id");
    let post_id = link_id
        .strip_prefix("t3_")
        .map(str::to_string)
        .unwrap_or(link_id);

    let parent_id = data
        .get("parent_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Some(Comment {
        id,
        body,
        author,
        subreddit: str_field(data, "subreddit"),
        score: i64_field(data, "score"),
        created_utc: timestamp_field(data, "created_utc"),
        parent_id,
        post_id,
    })
}

/// Decode subreddit metadata from a `t5` thing, the first child of a
/// `Listing`, or a bare `about.json` response.
pub fn parse_subreddit(value: &Value) -> Option<SubredditInfo> {
    let data = match kind_of(value) {
        Some(KIND_SUBREDDIT) => value.get("data")?,
        Some(KIND_LISTING) => {
            let children = listing_children(value);
            return children.first().and_then(parse_subreddit);
        }
        _ => value.get("data").unwrap_or(value),
    };

    let display_name = str_field(data, "display_name");
    if display_name.is_empty() {
        warn!("dropping subreddit without display_name");
        return None;
    }

    Some(SubredditInfo {
        name: display_name.to_lowercase(),
        display_name,
        title: str_field(data, "title"),
        description: str_field(data, "public_description"),
        subscribers: i64_field(data, "subscribers"),
        created_utc: timestamp_field(data, "created_utc"),
        over18: bool_field(data, "over18"),
    })
}

/// All posts of a `Listing` response, in listing order.
pub fn extract_posts(response: &Value) -> Vec<Post> {
    listing_children(response)
        .iter()
        .filter_map(parse_post)
        .collect()
}

/// Flatten the `[post_listing, comments_listing]` response of
/// `/comments/{post_id}.json` into a depth-first comment list. `more`
/// markers are skipped; nested `replies` Listings are recursed in order.
pub fn extract_comments(response: &Value) -> Vec<Comment> {
    let listings = match response.as_array() {
        Some(parts) if parts.len() >= 2 => parts,
        _ => {
            warn!("expected [post, comments] response shape");
            return Vec::new();
        }
    };

    let mut comments = Vec::new();
    flatten_comment_tree(listing_children(&listings[1]), &mut comments);
    comments
}

fn flatten_comment_tree(children: &[Value], out: &mut Vec<Comment>) {
    for child in children {
        if kind_of(child) == Some(KIND_MORE) {
            continue;
        }

        if let Some(comment) = parse_comment(child) {
            out.push(comment);
        }

        // replies is either a nested Listing or an empty string.
        let replies = child.get("data").and_then(|data| data.get("replies"));
        if let Some(replies @ Value::Object(_)) = replies {
            flatten_comment_tree(listing_children(replies), out);
        }
    }
}
