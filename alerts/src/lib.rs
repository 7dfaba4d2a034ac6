pub mod engine;
pub mod notifiers;
pub mod rules;

pub use engine::{Alert, AlertEngine, AlertStats, DEFAULT_COOLDOWN_MINUTES, DEFAULT_MAX_HISTORY};
pub use notifiers::{
    ConsoleNotifier, DiscordNotifier, EmailNotifier, Notifier, SlackNotifier, WebhookNotifier,
};
pub use rules::{AlertCondition, AlertKind, AlertRule, Comparison};
