use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Categories of alert a rule can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    KeywordSurge,
    SentimentShift,
    ActivitySpike,
    NewTrending,
    Custom,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::KeywordSurge => "keyword_surge",
            AlertKind::SentimentShift => "sentiment_shift",
            AlertKind::ActivitySpike => "activity_spike",
            AlertKind::NewTrending => "new_trending",
            AlertKind::Custom => "custom",
        }
    }

    /// Human label used in alert messages.
    pub fn label(&self) -> &'static str {
        match self {
            AlertKind::KeywordSurge => "Keyword surge detected",
            AlertKind::SentimentShift => "Sentiment shift detected",
            AlertKind::ActivitySpike => "Activity spike detected",
            AlertKind::NewTrending => "New trending topic detected",
            AlertKind::Custom => "Custom alert triggered",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison operators for rule conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
}

impl Comparison {
    /// Parse an operator string; anything unknown falls back to `ge` so a
    /// bad rule still evaluates rather than erroring.
    pub fn parse_or_default(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "gt" | ">" => Comparison::Gt,
            "ge" | ">=" => Comparison::Ge,
            "lt" | "<" => Comparison::Lt,
            "le" | "<=" => Comparison::Le,
            "eq" | "==" => Comparison::Eq,
            other => {
                warn!(comparison = other, "unknown comparison, defaulting to ge");
                Comparison::Ge
            }
        }
    }
}

/// Threshold condition evaluated against one metric field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    /// Metric key to read; missing keys evaluate as 0.
    pub field: String,
    pub threshold: f64,
    #[serde(default = "default_comparison")]
    pub comparison: Comparison,
    /// Window the metric was computed over, carried for reporting.
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,
}

fn default_comparison() -> Comparison {
    Comparison::Ge
}

fn default_window_minutes() -> u32 {
    60
}

impl AlertCondition {
    pub fn new(field: impl Into<String>, threshold: f64, comparison: Comparison) -> Self {
        Self {
            field: field.into(),
            threshold,
            comparison,
            window_minutes: default_window_minutes(),
        }
    }

    pub fn evaluate(&self, value: f64) -> bool {
        match self.comparison {
            Comparison::Gt => value > self.threshold,
            Comparison::Ge => value >= self.threshold,
            Comparison::Lt => value < self.threshold,
            Comparison::Le => value <= self.threshold,
            Comparison::Eq => (value - self.threshold).abs() < f64::EPSILON,
        }
    }
}

/// A registered alert rule, unique by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub kind: AlertKind,
    /// Optional subreddit filter, matched case-insensitively.
    #[serde(default)]
    pub subreddit: Option<String>,
    pub condition: AlertCondition,
    /// Names of the notifier channels to fan out to.
    #[serde(default)]
    pub notifiers: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Channel metadata (recipients, webhook URLs, ...), passed through to
    /// each notifier.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}

impl AlertRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: AlertKind,
        condition: AlertCondition,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            subreddit: None,
            condition,
            notifiers: Vec::new(),
            enabled: true,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_subreddit(mut self, subreddit: impl Into<String>) -> Self {
        self.subreddit = Some(subreddit.into());
        self
    }

    pub fn with_notifiers(mut self, notifiers: Vec<String>) -> Self {
        self.notifiers = notifiers;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether this rule applies to the given subreddit.
    pub fn matches_subreddit(&self, subreddit: &str) -> bool {
        match &self.subreddit {
            Some(filter) => filter.eq_ignore_ascii_case(subreddit),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparisons_evaluate_correctly() {
        let gt = AlertCondition::new("x", 10.0, Comparison::Gt);
        assert!(gt.evaluate(10.5));
        assert!(!gt.evaluate(10.0));

        let ge = AlertCondition::new("x", 10.0, Comparison::Ge);
        assert!(ge.evaluate(10.0));
        assert!(!ge.evaluate(9.9));

        let lt = AlertCondition::new("x", 10.0, Comparison::Lt);
        assert!(lt.evaluate(9.0));

        let le = AlertCondition::new("x", 10.0, Comparison::Le);
        assert!(le.evaluate(10.0));

        let eq = AlertCondition::new("x", 10.0, Comparison::Eq);
        assert!(eq.evaluate(10.0));
        assert!(!eq.evaluate(10.1));
    }

    #[test]
    fn unknown_comparison_defaults_to_ge() {
        assert_eq!(Comparison::parse_or_default("gt"), Comparison::Gt);
        assert_eq!(Comparison::parse_or_default(">="), Comparison::Ge);
        assert_eq!(Comparison::parse_or_default("between"), Comparison::Ge);
    }

    #[test]
    fn subreddit_filter_is_case_insensitive() {
        let rule = AlertRule::new(
            "r1",
            "spike",
            AlertKind::ActivitySpike,
            AlertCondition::new("posts_per_hour", 100.0, Comparison::Ge),
        )
        .with_subreddit("Python");

        assert!(rule.matches_subreddit("python"));
        assert!(rule.matches_subreddit("PYTHON"));
        assert!(!rule.matches_subreddit("rust"));

        let unfiltered = AlertRule::new(
            "r2",
            "any",
            AlertKind::Custom,
            AlertCondition::new("x", 0.0, Comparison::Ge),
        );
        assert!(unfiltered.matches_subreddit("anything"));
    }

    #[test]
    fn rules_round_trip_through_serde() {
        let rule = AlertRule::new(
            "r1",
            "keyword watch",
            AlertKind::KeywordSurge,
            AlertCondition::new("mentions", 25.0, Comparison::Gt),
        )
        .with_subreddit("rust")
        .with_notifiers(vec!["console".to_string(), "email".to_string()])
        .with_metadata(serde_json::json!({"to_addrs": ["ops@example.com"]}));

        let encoded = serde_json::to_string(&rule).unwrap();
        assert!(encoded.contains("keyword_surge"));

        let decoded: AlertRule = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, rule.id);
        assert_eq!(decoded.kind, AlertKind::KeywordSurge);
        assert_eq!(decoded.condition.comparison, Comparison::Gt);
        assert_eq!(decoded.notifiers.len(), 2);
        assert!(decoded.enabled);
    }
}
