//! Rule evaluation and alert dispatch.
//!
//! The engine owns the rule registry, the per-rule cooldown map, the
//! bounded alert history, and the notifier registry, all behind one
//! engine-level mutex; the workload is I/O-dominated so coarse locking is
//! enough. Notifier sends happen outside the lock.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::notifiers::Notifier;
use crate::rules::{AlertKind, AlertRule};

pub const DEFAULT_MAX_HISTORY: usize = 1000;
pub const DEFAULT_COOLDOWN_MINUTES: i64 = 5;

/// A triggered alert, append-only once created.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub kind: AlertKind,
    pub message: String,
    pub data: serde_json::Value,
    pub triggered_at: DateTime<Utc>,
    pub subreddit: String,
    pub sent: bool,
    pub sent_to: Vec<String>,
    pub error: Option<String>,
}

/// Aggregate engine counters.
#[derive(Debug, Clone, Serialize)]
pub struct AlertStats {
    pub total_rules: usize,
    pub enabled_rules: usize,
    pub registered_notifiers: Vec<String>,
    pub history_count: usize,
    pub sent_count: usize,
    pub failed_count: usize,
    pub by_kind: HashMap<String, usize>,
}

struct EngineInner {
    /// Insertion-ordered; `check_rules` iterates in this order.
    rules: Vec<AlertRule>,
    cooldowns: HashMap<String, DateTime<Utc>>,
    history: VecDeque<Alert>,
    notifiers: HashMap<String, Arc<dyn Notifier>>,
}

/// The alert engine (see module docs).
pub struct AlertEngine {
    inner: Mutex<EngineInner>,
    max_history: usize,
    cooldown: Duration,
}

impl AlertEngine {
    pub fn new(max_history: usize, cooldown_minutes: i64) -> Self {
        info!(max_history, cooldown_minutes, "alert engine initialized");
        Self {
            inner: Mutex::new(EngineInner {
                rules: Vec::new(),
                cooldowns: HashMap::new(),
                history: VecDeque::with_capacity(max_history.min(1024)),
                notifiers: HashMap::new(),
            }),
            max_history,
            cooldown: Duration::minutes(cooldown_minutes),
        }
    }

    // ------------------------------------------------------------------
    // Notifier registry
    // ------------------------------------------------------------------

    pub fn register_notifier(&self, name: impl Into<String>, notifier: Arc<dyn Notifier>) {
        let name = name.into();
        info!(name, "registered notifier");
        self.inner.lock().unwrap().notifiers.insert(name, notifier);
    }

    pub fn unregister_notifier(&self, name: &str) -> bool {
        let removed = self.inner.lock().unwrap().notifiers.remove(name).is_some();
        if removed {
            info!(name, "unregistered notifier");
        }
        removed
    }

    pub fn notifier_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .lock()
            .unwrap()
            .notifiers
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    // ------------------------------------------------------------------
    // Rule management
    // ------------------------------------------------------------------

    /// Add a rule; a duplicate id is an error.
    pub fn add_rule(&self, rule: AlertRule) -> Result<(), redwatch_core::CoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.rules.iter().any(|r| r.id == rule.id) {
            return Err(redwatch_core::CoreError::InvalidInput(format!(
                "rule with id '{}' already exists",
                rule.id
            )));
        }
        info!(rule = %rule.name, id = %rule.id, "added rule");
        inner.rules.push(rule);
        Ok(())
    }

    /// Replace an existing rule in place, keeping its position.
    pub fn update_rule(&self, rule: AlertRule) -> Result<(), redwatch_core::CoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(slot) => {
                info!(rule = %rule.name, id = %rule.id, "updated rule");
                *slot = rule;
                Ok(())
            }
            None => Err(redwatch_core::CoreError::InvalidInput(format!(
                "rule with id '{}' not found",
                rule.id
            ))),
        }
    }

    /// Remove a rule (and its cooldown entry).
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.rules.len();
        inner.rules.retain(|r| r.id != rule_id);
        let removed = inner.rules.len() != before;
        if removed {
            inner.cooldowns.remove(rule_id);
            info!(rule_id, "removed rule");
        }
        removed
    }

    pub fn get_rule(&self, rule_id: &str) -> Option<AlertRule> {
        self.inner
            .lock()
            .unwrap()
            .rules
            .iter()
            .find(|r| r.id == rule_id)
            .cloned()
    }

    pub fn rules(&self, enabled_only: bool) -> Vec<AlertRule> {
        self.inner
            .lock()
            .unwrap()
            .rules
            .iter()
            .filter(|r| !enabled_only || r.enabled)
            .cloned()
            .collect()
    }

    pub fn enable_rule(&self, rule_id: &str) -> bool {
        self.set_enabled(rule_id, true)
    }

    pub fn disable_rule(&self, rule_id: &str) -> bool {
        self.set_enabled(rule_id, false)
    }

    fn set_enabled(&self, rule_id: &str, enabled: bool) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.rules.iter_mut().find(|r| r.id == rule_id) {
            Some(rule) => {
                rule.enabled = enabled;
                info!(rule_id, enabled, "rule toggled");
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluate the metric map against every applicable rule and return
    /// the triggered alerts in rule-insertion order.
    ///
    /// Cooldown is recorded on match, before any delivery attempt, so
    /// repeated fires inside the window stay suppressed regardless of
    /// delivery outcome.
    pub fn check_rules(
        &self,
        subreddit: &str,
        metrics: &HashMap<String, f64>,
        kind_filter: Option<AlertKind>,
    ) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();

        let mut triggered: Vec<(String, Alert)> = Vec::new();
        for rule in &inner.rules {
            if !rule.enabled {
                continue;
            }
            if let Some(filter) = kind_filter {
                if rule.kind != filter {
                    continue;
                }
            }
            if !rule.matches_subreddit(subreddit) {
                continue;
            }
            if let Some(last) = inner.cooldowns.get(&rule.id) {
                if now - *last < self.cooldown {
                    debug!(rule_id = %rule.id, "rule in cooldown");
                    continue;
                }
            }

            // A missing metric field evaluates as 0.
            let value = metrics.get(&rule.condition.field).copied().unwrap_or(0.0);
            if rule.condition.evaluate(value) {
                let alert = Self::build_alert(rule, subreddit, metrics, value);
                info!(
                    rule = %rule.name,
                    subreddit,
                    value,
                    "alert triggered"
                );
                triggered.push((rule.id.clone(), alert));
            }
        }

        for (rule_id, alert) in triggered {
            inner.cooldowns.insert(rule_id, now);
            alerts.push(alert);
        }
        alerts
    }

    fn build_alert(
        rule: &AlertRule,
        subreddit: &str,
        metrics: &HashMap<String, f64>,
        value: f64,
    ) -> Alert {
        Alert {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            kind: rule.kind,
            message: format!(
                "{} in r/{}: {} (value: {:.2})",
                rule.kind.label(),
                subreddit,
                rule.name,
                value
            ),
            data: json!({
                "value": value,
                "threshold": rule.condition.threshold,
                "metrics": metrics,
                "rule_name": rule.name,
            }),
            triggered_at: Utc::now(),
            subreddit: subreddit.to_string(),
            sent: false,
            sent_to: Vec::new(),
            error: None,
        }
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Fan the alert out to its rule's notifiers and record it.
    ///
    /// Never fails: delivery errors are captured per channel into the
    /// alert's `error` field, and one channel failing does not block the
    /// others.
    pub async fn process_alert(&self, mut alert: Alert) -> Alert {
        let channels: Vec<(String, Option<Arc<dyn Notifier>>)>;
        let metadata;
        {
            let inner = self.inner.lock().unwrap();
            match inner.rules.iter().find(|r| r.id == alert.rule_id) {
                Some(rule) => {
                    metadata = rule.metadata.clone();
                    channels = rule
                        .notifiers
                        .iter()
                        .map(|name| (name.clone(), inner.notifiers.get(name).cloned()))
                        .collect();
                }
                None => {
                    warn!(rule_id = %alert.rule_id, "rule not found for alert");
                    alert.error = Some(format!("rule not found: {}", alert.rule_id));
                    drop(inner);
                    self.push_history(alert.clone());
                    return alert;
                }
            }
        }

        let mut sent_to = Vec::new();
        let mut errors = Vec::new();
        for (name, notifier) in channels {
            let Some(notifier) = notifier else {
                warn!(name, "notifier not registered, skipping");
                continue;
            };
            if notifier.send(&alert, &metadata).await {
                info!(channel = %name, alert_id = %alert.id, "alert delivered");
                sent_to.push(name);
            } else {
                warn!(channel = %name, alert_id = %alert.id, "alert delivery failed");
                errors.push(format!("{name}: failed"));
            }
        }

        alert.sent = !sent_to.is_empty();
        alert.sent_to = sent_to;
        if !errors.is_empty() {
            alert.error = Some(errors.join("; "));
        }

        self.push_history(alert.clone());
        alert
    }

    /// Deliver a synthetic alert through one notifier.
    pub async fn send_test_alert(&self, notifier_name: &str, metadata: &serde_json::Value) -> bool {
        let notifier = self
            .inner
            .lock()
            .unwrap()
            .notifiers
            .get(notifier_name)
            .cloned();
        let Some(notifier) = notifier else {
            warn!(notifier_name, "notifier not found for test alert");
            return false;
        };

        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            rule_id: "test".to_string(),
            kind: AlertKind::Custom,
            message: "This is a test alert from Redwatch".to_string(),
            data: json!({"test": true}),
            triggered_at: Utc::now(),
            subreddit: "test".to_string(),
            sent: false,
            sent_to: Vec::new(),
            error: None,
        };
        notifier.send(&alert, metadata).await
    }

    fn push_history(&self, alert: Alert) {
        let mut inner = self.inner.lock().unwrap();
        if inner.history.len() == self.max_history {
            inner.history.pop_front();
        }
        inner.history.push_back(alert);
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Alert history, newest first, optionally filtered.
    pub fn history(
        &self,
        limit: usize,
        rule_id: Option<&str>,
        subreddit: Option<&str>,
        sent_only: bool,
    ) -> Vec<Alert> {
        let inner = self.inner.lock().unwrap();
        let mut alerts: Vec<Alert> = inner
            .history
            .iter()
            .filter(|a| rule_id.map_or(true, |id| a.rule_id == id))
            .filter(|a| subreddit.map_or(true, |s| a.subreddit.eq_ignore_ascii_case(s)))
            .filter(|a| !sent_only || a.sent)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        alerts.truncate(limit);
        alerts
    }

    /// Drop the history, returning how many alerts were discarded.
    pub fn clear_history(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.history.len();
        inner.history.clear();
        info!(count, "alert history cleared");
        count
    }

    pub fn stats(&self) -> AlertStats {
        let inner = self.inner.lock().unwrap();
        let mut by_kind: HashMap<String, usize> = HashMap::new();
        for alert in &inner.history {
            *by_kind.entry(alert.kind.as_str().to_string()).or_default() += 1;
        }

        let mut registered_notifiers: Vec<String> = inner.notifiers.keys().cloned().collect();
        registered_notifiers.sort();

        AlertStats {
            total_rules: inner.rules.len(),
            enabled_rules: inner.rules.iter().filter(|r| r.enabled).count(),
            registered_notifiers,
            history_count: inner.history.len(),
            sent_count: inner.history.iter().filter(|a| a.sent).count(),
            failed_count: inner.history.iter().filter(|a| a.error.is_some()).count(),
            by_kind,
        }
    }

    // ------------------------------------------------------------------
    // Import / export
    // ------------------------------------------------------------------

    pub fn export_rules(&self) -> Vec<AlertRule> {
        self.inner.lock().unwrap().rules.clone()
    }

    /// Import rules, replacing same-id entries. Returns how many landed.
    pub fn import_rules(&self, rules: Vec<AlertRule>) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let mut count = 0;
        for rule in rules {
            if let Some(slot) = inner.rules.iter_mut().find(|r| r.id == rule.id) {
                *slot = rule;
            } else {
                inner.rules.push(rule);
            }
            count += 1;
        }
        info!(count, "imported rules");
        count
    }
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY, DEFAULT_COOLDOWN_MINUTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{AlertCondition, Comparison};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedNotifier {
        outcome: bool,
        calls: AtomicUsize,
    }

    impl FixedNotifier {
        fn new(outcome: bool) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Notifier for FixedNotifier {
        async fn send(&self, _alert: &Alert, _metadata: &serde_json::Value) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome
        }
    }

    fn posts_rule(id: &str, threshold: f64) -> AlertRule {
        AlertRule::new(
            id,
            format!("rule {id}"),
            AlertKind::ActivitySpike,
            AlertCondition::new("posts_per_hour", threshold, Comparison::Ge),
        )
        .with_subreddit("python")
    }

    fn metrics(posts_per_hour: f64) -> HashMap<String, f64> {
        HashMap::from([("posts_per_hour".to_string(), posts_per_hour)])
    }

    #[test]
    fn matching_rule_fires_once_then_cools_down() {
        let engine = AlertEngine::default();
        engine.add_rule(posts_rule("r1", 100.0)).unwrap();

        let first = engine.check_rules("python", &metrics(150.0), None);
        assert_eq!(first.len(), 1);
        assert!(first[0].message.contains("r/python"));
        assert!(first[0].message.contains("150.00"));

        let second = engine.check_rules("python", &metrics(150.0), None);
        assert!(second.is_empty());
    }

    #[test]
    fn cooldown_expires_after_the_window() {
        let engine = AlertEngine::new(10, 0);
        engine.add_rule(posts_rule("r1", 100.0)).unwrap();

        assert_eq!(engine.check_rules("python", &metrics(150.0), None).len(), 1);
        // Zero-minute cooldown: the very next check may fire again.
        assert_eq!(engine.check_rules("python", &metrics(150.0), None).len(), 1);
    }

    #[test]
    fn missing_metric_field_evaluates_as_zero() {
        let engine = AlertEngine::default();
        let rule = AlertRule::new(
            "low",
            "low watermark",
            AlertKind::Custom,
            AlertCondition::new("absent_metric", 5.0, Comparison::Lt),
        );
        engine.add_rule(rule).unwrap();

        let alerts = engine.check_rules("python", &HashMap::new(), None);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].data["value"], 0.0);
    }

    #[test]
    fn disabled_filtered_and_mismatched_rules_are_skipped() {
        let engine = AlertEngine::default();
        engine.add_rule(posts_rule("enabled", 10.0)).unwrap();

        let mut disabled = posts_rule("disabled", 10.0);
        disabled.enabled = false;
        engine.add_rule(disabled).unwrap();

        let other_sub = posts_rule("other", 10.0).with_subreddit("rust");
        engine
            .add_rule(AlertRule { id: "othersub".into(), ..other_sub })
            .unwrap();

        let alerts = engine.check_rules("python", &metrics(50.0), None);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule_id, "enabled");

        // Kind filter excludes the only matching rule.
        let filtered = engine.check_rules("python", &metrics(50.0), Some(AlertKind::Custom));
        assert!(filtered.is_empty());
    }

    #[test]
    fn rules_trigger_in_insertion_order() {
        let engine = AlertEngine::default();
        engine.add_rule(posts_rule("first", 1.0)).unwrap();
        engine.add_rule(posts_rule("second", 1.0)).unwrap();
        engine.add_rule(posts_rule("third", 1.0)).unwrap();

        let alerts = engine.check_rules("python", &metrics(10.0), None);
        let order: Vec<&str> = alerts.iter().map(|a| a.rule_id.as_str()).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn duplicate_rule_ids_are_rejected() {
        let engine = AlertEngine::default();
        engine.add_rule(posts_rule("r1", 1.0)).unwrap();
        assert!(engine.add_rule(posts_rule("r1", 2.0)).is_err());
        assert_eq!(engine.rules(false).len(), 1);
    }

    #[tokio::test]
    async fn process_alert_fans_out_and_records_partial_failures() {
        let engine = AlertEngine::default();
        let good = FixedNotifier::new(true);
        let bad = FixedNotifier::new(false);
        engine.register_notifier("good", good.clone());
        engine.register_notifier("bad", bad.clone());

        let rule = posts_rule("r1", 1.0).with_notifiers(vec![
            "good".to_string(),
            "bad".to_string(),
            "missing".to_string(),
        ]);
        engine.add_rule(rule).unwrap();

        let alert = engine
            .check_rules("python", &metrics(10.0), None)
            .pop()
            .unwrap();
        let processed = engine.process_alert(alert).await;

        assert!(processed.sent);
        assert_eq!(processed.sent_to, vec!["good"]);
        assert_eq!(processed.error.as_deref(), Some("bad: failed"));
        assert_eq!(good.calls.load(Ordering::SeqCst), 1);
        assert_eq!(bad.calls.load(Ordering::SeqCst), 1);

        let history = engine.history(10, None, None, false);
        assert_eq!(history.len(), 1);
        assert!(history[0].sent);
    }

    #[tokio::test]
    async fn alerts_for_vanished_rules_still_land_in_history() {
        let engine = AlertEngine::default();
        engine.add_rule(posts_rule("r1", 1.0)).unwrap();

        let alert = engine
            .check_rules("python", &metrics(10.0), None)
            .pop()
            .unwrap();
        engine.remove_rule("r1");

        let processed = engine.process_alert(alert).await;
        assert!(!processed.sent);
        assert!(processed.error.as_deref().unwrap().contains("rule not found"));
        assert_eq!(engine.history(10, None, None, false).len(), 1);
    }

    #[tokio::test]
    async fn test_alerts_go_through_the_named_notifier() {
        let engine = AlertEngine::default();
        let notifier = FixedNotifier::new(true);
        engine.register_notifier("console", notifier.clone());

        assert!(engine.send_test_alert("console", &json!({})).await);
        assert!(!engine.send_test_alert("absent", &json!({})).await);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn history_is_bounded_and_filterable() {
        let engine = AlertEngine::new(3, 0);
        engine.add_rule(posts_rule("r1", 1.0)).unwrap();

        for _ in 0..5 {
            for alert in engine.check_rules("python", &metrics(10.0), None) {
                engine.push_history(alert);
            }
        }
        assert_eq!(engine.history(10, None, None, false).len(), 3);
        assert_eq!(engine.history(10, Some("r1"), None, false).len(), 3);
        assert_eq!(engine.history(10, Some("nope"), None, false).len(), 0);
        assert_eq!(engine.history(10, None, Some("PYTHON"), false).len(), 3);
        assert!(engine.history(10, None, None, true).is_empty());

        assert_eq!(engine.clear_history(), 3);
        assert!(engine.history(10, None, None, false).is_empty());
    }

    #[test]
    fn stats_reflect_rules_and_history() {
        let engine = AlertEngine::new(10, 0);
        engine.add_rule(posts_rule("r1", 1.0)).unwrap();
        let mut off = posts_rule("r2", 1.0);
        off.enabled = false;
        engine.add_rule(off).unwrap();
        engine.register_notifier("console", FixedNotifier::new(true));

        for alert in engine.check_rules("python", &metrics(10.0), None) {
            engine.push_history(alert);
        }

        let stats = engine.stats();
        assert_eq!(stats.total_rules, 2);
        assert_eq!(stats.enabled_rules, 1);
        assert_eq!(stats.registered_notifiers, vec!["console"]);
        assert_eq!(stats.history_count, 1);
        assert_eq!(stats.by_kind.get("activity_spike"), Some(&1));
    }

    #[test]
    fn export_import_round_trips_rules() {
        let engine = AlertEngine::default();
        engine.add_rule(posts_rule("r1", 1.0)).unwrap();
        engine.add_rule(posts_rule("r2", 2.0)).unwrap();

        let exported = engine.export_rules();
        assert_eq!(exported.len(), 2);

        let other = AlertEngine::default();
        assert_eq!(other.import_rules(exported), 2);
        assert_eq!(other.rules(false).len(), 2);
    }
}
