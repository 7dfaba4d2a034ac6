//! Delivery channels for triggered alerts.
//!
//! Every notifier implements one async `send` returning a bool and is safe
//! for concurrent invocation; failures are logged and reported, never
//! raised.

use async_trait::async_trait;
use lettre::message::{header, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use redwatch_core::SmtpConfig;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::engine::Alert;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP statuses that count as a delivered webhook.
const WEBHOOK_OK: [u16; 4] = [200, 201, 202, 204];

/// A delivery channel, registered on the engine by name.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `alert`. `metadata` is the triggering rule's channel
    /// metadata (recipients, URL overrides, ...). Returns delivery
    /// success.
    async fn send(&self, alert: &Alert, metadata: &Value) -> bool;
}

fn metadata_str(metadata: &Value, key: &str) -> Option<String> {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

// ----------------------------------------------------------------------
// Email
// ----------------------------------------------------------------------

/// SMTP email delivery with a multipart plain+HTML body.
pub struct EmailNotifier {
    config: SmtpConfig,
}

impl EmailNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn recipients(metadata: &Value) -> Vec<String> {
        metadata
            .get("to_addrs")
            .and_then(Value::as_array)
            .map(|addrs| {
                addrs
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn mailer(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, lettre::transport::smtp::Error> {
        let credentials =
            Credentials::new(self.config.username.clone(), self.config.password.clone());

        let builder = if self.config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.host)
        };

        Ok(builder
            .port(self.config.port)
            .credentials(credentials)
            .build())
    }

    fn text_body(alert: &Alert) -> String {
        let mut lines = vec![
            format!("Alert Type: {}", alert.kind),
            format!("Message: {}", alert.message),
        ];
        if !alert.subreddit.is_empty() {
            lines.push(format!("Subreddit: r/{}", alert.subreddit));
        }
        lines.push(format!("Triggered At: {}", alert.triggered_at.to_rfc3339()));
        lines.push(String::new());
        lines.push("Details:".to_string());
        if let Some(data) = alert.data.as_object() {
            for (key, value) in data {
                lines.push(format!("  - {key}: {value}"));
            }
        }
        lines.join("\n")
    }

    fn html_body(alert: &Alert) -> String {
        let subreddit_line = if alert.subreddit.is_empty() {
            String::new()
        } else {
            format!("<p><strong>Subreddit:</strong> r/{}</p>", alert.subreddit)
        };

        let details = alert
            .data
            .as_object()
            .map(|data| {
                let items: String = data
                    .iter()
                    .map(|(k, v)| format!("<li><strong>{k}:</strong> {v}</li>"))
                    .collect();
                format!("<h3>Details</h3><ul>{items}</ul>")
            })
            .unwrap_or_default();

        format!(
            r#"<html>
<body style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <div style="background-color: #fff3cd; border: 1px solid #ffc107; border-radius: 8px; padding: 15px;">
    <div style="color: #856404; font-weight: bold;">{kind}</div>
    <p>{message}</p>
  </div>
  {subreddit_line}
  <p><strong>Triggered At:</strong> {triggered_at}</p>
  {details}
  <p style="color: #666; font-size: 12px; border-top: 1px solid #ddd; padding-top: 10px;">
    This is an automated notification from Redwatch.
  </p>
</body>
</html>"#,
            kind = alert.kind.as_str().to_uppercase(),
            message = alert.message,
            subreddit_line = subreddit_line,
            triggered_at = alert.triggered_at.to_rfc3339(),
            details = details,
        )
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, alert: &Alert, metadata: &Value) -> bool {
        let recipients = Self::recipients(metadata);
        if recipients.is_empty() {
            warn!("no recipients specified for email notification");
            return false;
        }

        let subject = format!(
            "[Redwatch] {}: {}",
            alert.kind,
            alert.message.chars().take(50).collect::<String>()
        );

        let mut builder = Message::builder().subject(subject);
        match self.config.from_addr.parse() {
            Ok(from) => builder = builder.from(from),
            Err(e) => {
                error!(error = %e, "invalid from address");
                return false;
            }
        }
        for recipient in &recipients {
            match recipient.parse() {
                Ok(to) => builder = builder.to(to),
                Err(e) => {
                    warn!(recipient, error = %e, "skipping invalid recipient");
                }
            }
        }

        let body = MultiPart::alternative()
            .singlepart(
                SinglePart::builder()
                    .header(header::ContentType::TEXT_PLAIN)
                    .body(Self::text_body(alert)),
            )
            .singlepart(
                SinglePart::builder()
                    .header(header::ContentType::TEXT_HTML)
                    .body(Self::html_body(alert)),
            );

        let message = match builder.multipart(body) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "failed to build email message");
                return false;
            }
        };

        let mailer = match self.mailer() {
            Ok(mailer) => mailer,
            Err(e) => {
                error!(error = %e, "failed to build SMTP transport");
                return false;
            }
        };

        match mailer.send(message).await {
            Ok(_) => {
                info!(recipients = recipients.len(), "email alert sent");
                true
            }
            Err(e) => {
                error!(error = %e, "failed to send email alert");
                false
            }
        }
    }
}

// ----------------------------------------------------------------------
// Generic webhook
// ----------------------------------------------------------------------

/// HTTP POST of the alert envelope as JSON.
pub struct WebhookNotifier {
    client: Client,
    default_url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(default_url: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(WEBHOOK_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            default_url,
        }
    }

    pub(crate) fn payload(alert: &Alert) -> Value {
        json!({
            "id": alert.id,
            "type": alert.kind.as_str(),
            "message": alert.message,
            "data": alert.data,
            "subreddit": alert.subreddit,
            "triggered_at": alert.triggered_at.to_rfc3339(),
        })
    }

    pub(crate) async fn post(&self, url: &str, payload: &Value) -> bool {
        match self.client.post(url).json(payload).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if WEBHOOK_OK.contains(&status) {
                    info!(url, "webhook delivered");
                    true
                } else {
                    warn!(url, status, "webhook rejected");
                    false
                }
            }
            Err(e) => {
                error!(url, error = %e, "webhook request failed");
                false
            }
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, alert: &Alert, metadata: &Value) -> bool {
        let url = metadata_str(metadata, "url").or_else(|| self.default_url.clone());
        let Some(url) = url else {
            warn!("no webhook URL specified");
            return false;
        };
        self.post(&url, &Self::payload(alert)).await
    }
}

// ----------------------------------------------------------------------
// Slack
// ----------------------------------------------------------------------

fn slack_color(kind: &str) -> &'static str {
    match kind {
        "keyword_surge" => "#36a64f",
        "sentiment_shift" => "#ff9500",
        "activity_spike" => "#007aff",
        "new_trending" => "#5856d6",
        _ => "#8e8e93",
    }
}

fn title_case(kind: &str) -> String {
    kind.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Slack incoming-webhook delivery with attachment formatting.
pub struct SlackNotifier {
    transport: WebhookNotifier,
    channel: Option<String>,
    username: String,
    icon_emoji: String,
}

impl SlackNotifier {
    pub fn new(
        webhook_url: Option<String>,
        channel: Option<String>,
        username: impl Into<String>,
        icon_emoji: impl Into<String>,
    ) -> Self {
        Self {
            transport: WebhookNotifier::new(webhook_url),
            channel,
            username: username.into(),
            icon_emoji: icon_emoji.into(),
        }
    }

    pub(crate) fn payload(&self, alert: &Alert) -> Value {
        let mut fields = Vec::new();
        if !alert.subreddit.is_empty() {
            fields.push(json!({
                "title": "Subreddit",
                "value": format!("r/{}", alert.subreddit),
                "short": true,
            }));
        }
        for key in ["value", "threshold"] {
            if let Some(value) = alert.data.get(key) {
                fields.push(json!({
                    "title": title_case(key),
                    "value": value.to_string(),
                    "short": true,
                }));
            }
        }

        let mut payload = json!({
            "username": self.username,
            "icon_emoji": self.icon_emoji,
            "attachments": [{
                "fallback": alert.message,
                "color": slack_color(alert.kind.as_str()),
                "title": format!(":bell: {}", title_case(alert.kind.as_str())),
                "text": alert.message,
                "fields": fields,
                "footer": "Redwatch",
                "ts": alert.triggered_at.timestamp(),
            }],
        });
        if let Some(channel) = &self.channel {
            payload["channel"] = json!(channel);
        }
        payload
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, alert: &Alert, metadata: &Value) -> bool {
        let url = metadata_str(metadata, "url").or_else(|| self.transport.default_url.clone());
        let Some(url) = url else {
            warn!("no Slack webhook URL specified");
            return false;
        };
        self.transport.post(&url, &self.payload(alert)).await
    }
}

// ----------------------------------------------------------------------
// Discord
// ----------------------------------------------------------------------

fn discord_color(kind: &str) -> u32 {
    match kind {
        "keyword_surge" => 0x36A64F,
        "sentiment_shift" => 0xFF9500,
        "activity_spike" => 0x007AFF,
        "new_trending" => 0x5856D6,
        _ => 0x8E8E93,
    }
}

/// Discord webhook delivery with embed formatting.
pub struct DiscordNotifier {
    transport: WebhookNotifier,
    username: String,
}

impl DiscordNotifier {
    pub fn new(webhook_url: Option<String>, username: impl Into<String>) -> Self {
        Self {
            transport: WebhookNotifier::new(webhook_url),
            username: username.into(),
        }
    }

    pub(crate) fn payload(&self, alert: &Alert) -> Value {
        let mut fields = Vec::new();
        if !alert.subreddit.is_empty() {
            fields.push(json!({
                "name": "Subreddit",
                "value": format!("r/{}", alert.subreddit),
                "inline": true,
            }));
        }
        for key in ["value", "threshold"] {
            if let Some(value) = alert.data.get(key) {
                fields.push(json!({
                    "name": title_case(key),
                    "value": value.to_string(),
                    "inline": true,
                }));
            }
        }

        json!({
            "username": self.username,
            "embeds": [{
                "title": title_case(alert.kind.as_str()),
                "description": alert.message,
                "color": discord_color(alert.kind.as_str()),
                "fields": fields,
                "footer": {"text": "Redwatch"},
                "timestamp": alert.triggered_at.to_rfc3339(),
            }],
        })
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, alert: &Alert, metadata: &Value) -> bool {
        let url = metadata_str(metadata, "url").or_else(|| self.transport.default_url.clone());
        let Some(url) = url else {
            warn!("no Discord webhook URL specified");
            return false;
        };
        self.transport.post(&url, &self.payload(alert)).await
    }
}

// ----------------------------------------------------------------------
// Console
// ----------------------------------------------------------------------

/// Prints alerts to stdout; handy in development and always succeeds.
pub struct ConsoleNotifier {
    verbose: bool,
}

impl ConsoleNotifier {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send(&self, alert: &Alert, _metadata: &Value) -> bool {
        println!("\n{}", "=".repeat(60));
        println!("[ALERT] {}", alert.kind.as_str().to_uppercase());
        println!("Message: {}", alert.message);
        if !alert.subreddit.is_empty() {
            println!("Subreddit: r/{}", alert.subreddit);
        }
        println!("Time: {}", alert.triggered_at.to_rfc3339());

        if self.verbose {
            if let Some(data) = alert.data.as_object() {
                println!("\nDetails:");
                for (key, value) in data {
                    println!("  - {key}: {value}");
                }
            }
        }

        println!("{}\n", "=".repeat(60));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::AlertKind;
    use chrono::Utc;

    fn alert() -> Alert {
        Alert {
            id: "a1".to_string(),
            rule_id: "r1".to_string(),
            kind: AlertKind::ActivitySpike,
            message: "Activity spike detected in r/python: burst (value: 42.00)".to_string(),
            data: json!({"value": 42.0, "threshold": 20.0, "rule_name": "burst"}),
            triggered_at: Utc::now(),
            subreddit: "python".to_string(),
            sent: false,
            sent_to: Vec::new(),
            error: None,
        }
    }

    #[tokio::test]
    async fn console_notifier_always_succeeds() {
        let notifier = ConsoleNotifier::new(true);
        assert!(notifier.send(&alert(), &json!({})).await);
    }

    #[tokio::test]
    async fn webhook_without_url_fails_fast() {
        let notifier = WebhookNotifier::new(None);
        assert!(!notifier.send(&alert(), &json!({})).await);
    }

    #[tokio::test]
    async fn email_without_recipients_fails_fast() {
        let notifier = EmailNotifier::new(SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: "user".to_string(),
            password: "pass".to_string(),
            from_addr: "redwatch@example.com".to_string(),
            use_tls: true,
        });
        assert!(!notifier.send(&alert(), &json!({})).await);
        assert!(!notifier.send(&alert(), &json!({"to_addrs": []})).await);
    }

    #[test]
    fn webhook_payload_carries_the_envelope() {
        let payload = WebhookNotifier::payload(&alert());
        assert_eq!(payload["id"], "a1");
        assert_eq!(payload["type"], "activity_spike");
        assert_eq!(payload["subreddit"], "python");
        assert_eq!(payload["data"]["value"], 42.0);
        assert!(payload["triggered_at"].as_str().is_some());
    }

    #[test]
    fn slack_payload_uses_attachments_with_fields() {
        let notifier = SlackNotifier::new(
            Some("https://hooks.slack.invalid/x".to_string()),
            Some("#alerts".to_string()),
            "Redwatch Bot",
            ":bell:",
        );
        let payload = notifier.payload(&alert());

        assert_eq!(payload["username"], "Redwatch Bot");
        assert_eq!(payload["channel"], "#alerts");
        let attachment = &payload["attachments"][0];
        assert_eq!(attachment["color"], "#007aff");
        assert_eq!(attachment["title"], ":bell: Activity Spike");
        let fields = attachment["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0]["title"], "Subreddit");
        assert_eq!(fields[0]["value"], "r/python");
    }

    #[test]
    fn discord_payload_uses_embeds_with_decimal_color() {
        let notifier = DiscordNotifier::new(None, "Redwatch");
        let payload = notifier.payload(&alert());

        let embed = &payload["embeds"][0];
        assert_eq!(embed["title"], "Activity Spike");
        assert_eq!(embed["color"], 0x007AFF);
        assert_eq!(embed["footer"]["text"], "Redwatch");
        let fields = embed["fields"].as_array().unwrap();
        assert!(fields.iter().any(|f| f["name"] == "Threshold"));
    }

    #[test]
    fn email_bodies_include_the_essentials() {
        let text = EmailNotifier::text_body(&alert());
        assert!(text.contains("Alert Type: activity_spike"));
        assert!(text.contains("Subreddit: r/python"));
        assert!(text.contains("value"));

        let html = EmailNotifier::html_body(&alert());
        assert!(html.contains("ACTIVITY_SPIKE"));
        assert!(html.contains("r/python"));
    }
}
