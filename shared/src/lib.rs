//! Shared infrastructure for the scheduler platform: error types,
//! configuration loading, tracing setup, and the KV/pub-sub substrate
//! abstraction used by every service in the workspace.

pub mod config;
pub mod error;
pub mod kv;
pub mod metrics;
pub mod tracing_setup;

pub use config::AppConfig;
pub use error::{Result, SchedulerError};
pub use kv::{KvStore, MemoryKv, RedisKv, ScoredMember};
pub use metrics::MetricsRegistry;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SERVICE_NAME: &str = "scheduler-platform";

/// Common HTTP headers used across services.
pub mod headers {
    pub const REQUEST_ID: &str = "x-request-id";
    pub const CORRELATION_ID: &str = "x-correlation-id";
    pub const USER_ID: &str = "x-user-id";
}

/// Reserved KV substrate key and channel names, kept in one place so
/// every crate agrees on the wire format described in the scheduler's
/// external interface.
pub mod keys {
    pub const TASK_PREFIX: &str = "task:";
    pub const BUCKET_PREFIX: &str = "bucket:";
    pub const BACKLOG_KEY: &str = "task:backlog";
    pub const ACTIVE_KEY: &str = "task:active";
    pub const BUCKET_COUNT: u32 = 16;

    pub const ENERGY_COMPLETIONS_KEY: &str = "energy:completions";
    pub const ENERGY_USER_REPORTED_KEY: &str = "energy:user_reported";
    pub const ENERGY_USER_REPORTED_TS_KEY: &str = "energy:user_reported_ts";
    pub const ENERGY_CURRENT_KEY: &str = "energy:current";

    pub const SENTINEL_PREFIX: &str = "sentinel:";
    pub const PROFILER_TASK_COMPLETIONS_KEY: &str = "profiler:task_completions";
    pub const PROFILER_DAILY_GOALS_KEY: &str = "profiler:daily_goals";
    pub const PROFILER_LAST_RESULT_KEY: &str = "profiler:last_result";
    pub const PROFILER_TEMPORAL_TRACKER_KEY: &str = "profiler:temporal_tracker";

    pub const DRAFT_PREFIX: &str = "draft:";

    pub const EVENTS_CHANNEL: &str = "events";
    pub const APPROVALS_CHANNEL: &str = "approvals";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn service_name_is_scheduler_platform() {
        assert_eq!(SERVICE_NAME, "scheduler-platform");
    }
}
