pub mod monitor;
pub mod registry;
pub mod sse;

pub use monitor::{
    ActivityTracker, LiveUpdate, LiveUpdateKind, MonitorConfig, SubredditMonitor, Subscription,
    SUBSCRIBER_QUEUE_CAPACITY,
};
pub use registry::{MonitorInfo, MonitorRegistry};
