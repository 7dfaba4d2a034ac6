pub mod collector;
pub mod pipeline;
pub mod preprocessor;
pub mod scheduler;

pub use collector::{CollectionResult, Collector, CollectorConfig};
pub use pipeline::{CollectionOutcome, DataPipeline, ProcessingResult};
pub use preprocessor::{Mentions, TextPreprocessor, TextStats};
pub use scheduler::{ScheduleConfig, ScheduleRun, SchedulerState, SchedulerStatus, SimpleScheduler};
