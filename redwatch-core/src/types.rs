use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A Reddit submission as seen by the fetch layer.
///
/// `id` is the bare Reddit id (no `t3_` prefix); `created_utc` is already
/// converted from UNIX seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    pub author: String,
    pub subreddit: String,
    pub score: i64,
    pub num_comments: i64,
    pub created_utc: DateTime<Utc>,
    pub url: String,
    pub permalink: String,
    pub is_self: bool,
}

/// A Reddit comment, flattened out of its reply tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub body: String,
    pub author: String,
    pub subreddit: String,
    pub score: i64,
    pub created_utc: DateTime<Utc>,
    /// Fullname of the parent thing; a `t3_` prefix marks a top-level comment.
    pub parent_id: Option<String>,
    /// Bare reddit id of the submission this comment belongs to.
    pub post_id: String,
}

impl Comment {
    /// Whether this comment answers the submission directly.
    pub fn is_top_level(&self) -> bool {
        self.parent_id
            .as_deref()
            .map(|p| p.starts_with("t3_"))
            .unwrap_or(true)
    }
}

/// Subreddit metadata from `about.json` or a search listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubredditInfo {
    /// Case-folded unique key.
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub subscribers: i64,
    pub created_utc: DateTime<Utc>,
    pub over18: bool,
}

/// Listing sort orders supported by both backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Hot,
    New,
    Top,
    Rising,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Hot => "hot",
            SortOrder::New => "new",
            SortOrder::Top => "top",
            SortOrder::Rising => "rising",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hot" => Ok(SortOrder::Hot),
            "new" => Ok(SortOrder::New),
            "top" => Ok(SortOrder::Top),
            "rising" => Ok(SortOrder::Rising),
            other => Err(CoreError::InvalidInput(format!(
                "unknown sort order: {other}"
            ))),
        }
    }
}

/// Time windows accepted by `top` listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFilter {
    Hour,
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFilter::Hour => "hour",
            TimeFilter::Day => "day",
            TimeFilter::Week => "week",
            TimeFilter::Month => "month",
            TimeFilter::Year => "year",
            TimeFilter::All => "all",
        }
    }
}

impl fmt::Display for TimeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeFilter {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hour" => Ok(TimeFilter::Hour),
            "day" => Ok(TimeFilter::Day),
            "week" => Ok(TimeFilter::Week),
            "month" => Ok(TimeFilter::Month),
            "year" => Ok(TimeFilter::Year),
            "all" => Ok(TimeFilter::All),
            other => Err(CoreError::InvalidInput(format!(
                "unknown time filter: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_order_round_trips() {
        for sort in ["hot", "new", "top", "rising"] {
            let parsed: SortOrder = sort.parse().unwrap();
            assert_eq!(parsed.as_str(), sort);
        }
        assert!("controversial".parse::<SortOrder>().is_err());
    }

    #[test]
    fn time_filter_is_case_insensitive() {
        assert_eq!("WEEK".parse::<TimeFilter>().unwrap(), TimeFilter::Week);
        assert!("fortnight".parse::<TimeFilter>().is_err());
    }

    #[test]
    fn top_level_detection_handles_missing_parent() {
        let comment = Comment {
            id: "c1".into(),
            body: "hello".into(),
            author: "user".into(),
            subreddit: "rust".into(),
            score: 1,
            created_utc: Utc::now(),
            parent_id: Some("t3_abc".into()),
            post_id: "abc".into(),
        };
        assert!(comment.is_top_level());

        let nested = Comment {
            parent_id: Some("t1_def".into()),
            ..comment.clone()
        };
        assert!(!nested.is_top_level());
    }
}
