use serde::{Deserialize, Serialize};

/// Configuration for the workflow engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Capacity of the event broadcast channel
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
        }
    }
}

/// Configuration for the cron scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Capacity of the scheduler's event broadcast channel
    pub event_buffer_size: usize,
    /// Recorded as the `user` of every scheduled execution
    pub user: String,
    /// Skip a tick while the previous run of the same workflow is still going
    pub skip_if_running: bool,
    /// Page size used when loading cron triggers from the repository
    pub page_size: usize,
    /// Engine settings for the per-tick engines
    pub runtime: RuntimeConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            user: "scheduler".to_string(),
            skip_if_running: false,
            page_size: 100,
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Top-level configuration, built once at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub runtime: RuntimeConfig,
    pub scheduler: SchedulerConfig,
}
