//! Workflow execution runtime
//!
//! This crate provides the node registry, the engine that validates and runs
//! workflows, and the cron scheduler that re-runs persisted workflows.

mod config;
mod cron;
mod engine;
mod executor;
pub mod loader;
mod registry;
mod repository;
mod scheduler;
mod validation;

pub use config::{FlowConfig, RuntimeConfig, SchedulerConfig};
pub use cron::{CronError, CronExpression};
pub use engine::WorkflowEngine;
pub use loader::LoadError;
pub use registry::{
    BulkRegistrationError, ConfigValidator, NodeDefinition, NodeRegistry, RegistryError,
    RegistryStatistics,
};
pub use repository::{
    FileWorkflowRepository, InMemoryWorkflowRepository, RepositoryError, WorkflowRepository,
    WorkflowStats,
};
pub use scheduler::{
    ScheduleUpdate, ScheduledWorkflow, SchedulerError, SchedulerStatistics, UpcomingRun,
    WorkflowScheduler,
};
pub use validation::validate_workflow;
