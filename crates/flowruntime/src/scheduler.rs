//! Cron-driven re-execution of persisted workflows.
//!
//! Every scheduled workflow owns one timer task. On each tick the workflow is
//! re-read from the repository, registered into a fresh engine built over a
//! snapshot of the node registry, executed, and its result persisted.

use crate::config::SchedulerConfig;
use crate::cron::{CronError, CronExpression};
use crate::engine::WorkflowEngine;
use crate::registry::NodeRegistry;
use crate::repository::{RepositoryError, WorkflowRepository};
use chrono::{DateTime, Utc};
use flowcore::{
    EventBus, ExecutionId, ExecutionOptions, ExecutionResult, FlowError, Value, Workflow,
    WorkflowEvent, WorkflowId,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    InvalidCron(#[from] CronError),

    #[error("No schedule for workflow: {0}")]
    NotScheduled(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Bookkeeping for one scheduled workflow
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledWorkflow {
    pub workflow_id: WorkflowId,
    pub cron_expression: String,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
}

/// Partial update applied by [`WorkflowScheduler::update_schedule`]
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub cron_expression: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpcomingRun {
    pub workflow_id: WorkflowId,
    pub next_run: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatistics {
    pub total_schedules: usize,
    pub enabled_schedules: usize,
    pub disabled_schedules: usize,
    pub total_runs: u64,
    /// The next ten runs across all enabled schedules, soonest first
    pub upcoming_runs: Vec<UpcomingRun>,
}

const UPCOMING_RUNS: usize = 10;

struct CronJob {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl CronJob {
    fn stop(self) -> JoinHandle<()> {
        self.cancel.cancel();
        self.handle
    }
}

struct ScheduleEntry {
    record: ScheduledWorkflow,
    cron: CronExpression,
    job: Option<CronJob>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    repository: Arc<dyn WorkflowRepository>,
    registry: Arc<RwLock<NodeRegistry>>,
    event_bus: Arc<EventBus>,
    schedules: RwLock<HashMap<WorkflowId, ScheduleEntry>>,
    running: Mutex<HashSet<WorkflowId>>,
    initialized: AtomicBool,
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        for entry in self.schedules.get_mut().values() {
            if let Some(job) = &entry.job {
                job.cancel.cancel();
            }
        }
    }
}

/// Marks a workflow as running for the skip-if-running policy
struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<WorkflowId>>,
    workflow_id: WorkflowId,
}

impl<'a> RunningGuard<'a> {
    fn acquire(running: &'a Mutex<HashSet<WorkflowId>>, workflow_id: &str) -> Option<Self> {
        let inserted = running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(workflow_id.to_string());
        inserted.then(|| Self {
            running,
            workflow_id: workflow_id.to_string(),
        })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.workflow_id);
    }
}

/// Cron scheduler for persisted workflows. Cheap to clone.
#[derive(Clone)]
pub struct WorkflowScheduler {
    inner: Arc<SchedulerInner>,
}

impl WorkflowScheduler {
    pub fn new(
        repository: Arc<dyn WorkflowRepository>,
        registry: Arc<RwLock<NodeRegistry>>,
        config: SchedulerConfig,
    ) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                repository,
                registry,
                event_bus,
                schedules: RwLock::new(HashMap::new()),
                running: Mutex::new(HashSet::new()),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    /// Schedule every workflow in the repository that carries an enabled cron
    /// trigger. Returns the number of schedules created.
    pub async fn initialize(&self) -> Result<usize, SchedulerError> {
        let page_size = self.inner.config.page_size.max(1);
        let mut offset = 0;
        let mut scheduled = 0;

        loop {
            let page = self
                .inner
                .repository
                .list_workflows(page_size, offset)
                .await?;
            let fetched = page.len();

            for workflow in page {
                let Some(expression) = workflow.cron_expressions().next() else {
                    continue;
                };
                match self.schedule_workflow(&workflow.id, expression, true).await {
                    Ok(_) => scheduled += 1,
                    Err(e) => tracing::warn!(
                        workflow_id = %workflow.id,
                        error = %e,
                        "Ignoring cron trigger"
                    ),
                }
            }

            if fetched < page_size {
                break;
            }
            offset += fetched;
        }

        self.inner.initialized.store(true, Ordering::SeqCst);
        tracing::info!(count = scheduled, "Workflow scheduler initialized");
        Ok(scheduled)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Schedule a workflow, replacing any existing schedule for it
    pub async fn schedule_workflow(
        &self,
        workflow_id: &str,
        cron_expression: &str,
        enabled: bool,
    ) -> Result<ScheduledWorkflow, SchedulerError> {
        let cron = CronExpression::parse(cron_expression)?;
        let record = self.install(workflow_id, cron, enabled, None).await;

        tracing::info!(
            %workflow_id,
            cron = %record.cron_expression,
            enabled,
            next_run = ?record.next_run,
            "Workflow scheduled"
        );
        self.inner.event_bus.emit(WorkflowEvent::WorkflowScheduled {
            workflow_id: workflow_id.to_string(),
            cron_expression: record.cron_expression.clone(),
            enabled,
            next_run: record.next_run,
            timestamp: Utc::now(),
        });
        Ok(record)
    }

    /// Store a schedule entry, stopping the timer of the one it replaces
    async fn install(
        &self,
        workflow_id: &str,
        cron: CronExpression,
        enabled: bool,
        history: Option<&ScheduledWorkflow>,
    ) -> ScheduledWorkflow {
        let record = ScheduledWorkflow {
            workflow_id: workflow_id.to_string(),
            cron_expression: cron.as_str().to_string(),
            enabled,
            last_run: history.and_then(|h| h.last_run),
            next_run: if enabled { cron.next_run() } else { None },
            run_count: history.map_or(0, |h| h.run_count),
        };
        let job = enabled.then(|| self.spawn_job(workflow_id, cron.clone()));

        let previous = self.inner.schedules.write().await.insert(
            workflow_id.to_string(),
            ScheduleEntry {
                record: record.clone(),
                cron,
                job,
            },
        );
        if let Some(job) = previous.and_then(|entry| entry.job) {
            let _ = job.stop().await;
        }
        record
    }

    pub async fn unschedule_workflow(&self, workflow_id: &str) -> Result<ScheduledWorkflow, SchedulerError> {
        let entry = self
            .inner
            .schedules
            .write()
            .await
            .remove(workflow_id)
            .ok_or_else(|| SchedulerError::NotScheduled(workflow_id.to_string()))?;
        if let Some(job) = entry.job {
            let _ = job.stop().await;
        }

        tracing::info!(%workflow_id, "Workflow unscheduled");
        self.inner.event_bus.emit(WorkflowEvent::WorkflowUnscheduled {
            workflow_id: workflow_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(entry.record)
    }

    pub async fn enable_schedule(&self, workflow_id: &str) -> Result<ScheduledWorkflow, SchedulerError> {
        let mut schedules = self.inner.schedules.write().await;
        let entry = schedules
            .get_mut(workflow_id)
            .ok_or_else(|| SchedulerError::NotScheduled(workflow_id.to_string()))?;

        if entry.job.is_none() {
            entry.job = Some(self.spawn_job(workflow_id, entry.cron.clone()));
        }
        entry.record.enabled = true;
        entry.record.next_run = entry.cron.next_run();

        tracing::info!(%workflow_id, next_run = ?entry.record.next_run, "Schedule enabled");
        Ok(entry.record.clone())
    }

    pub async fn disable_schedule(&self, workflow_id: &str) -> Result<ScheduledWorkflow, SchedulerError> {
        let (record, job) = {
            let mut schedules = self.inner.schedules.write().await;
            let entry = schedules
                .get_mut(workflow_id)
                .ok_or_else(|| SchedulerError::NotScheduled(workflow_id.to_string()))?;
            entry.record.enabled = false;
            entry.record.next_run = None;
            (entry.record.clone(), entry.job.take())
        };
        if let Some(job) = job {
            let _ = job.stop().await;
        }

        tracing::info!(%workflow_id, "Schedule disabled");
        Ok(record)
    }

    /// Change the expression and/or enabled flag, keeping run history
    pub async fn update_schedule(
        &self,
        workflow_id: &str,
        update: ScheduleUpdate,
    ) -> Result<ScheduledWorkflow, SchedulerError> {
        let current = self
            .get_schedule(workflow_id)
            .await
            .ok_or_else(|| SchedulerError::NotScheduled(workflow_id.to_string()))?;

        let expression = update
            .cron_expression
            .as_deref()
            .unwrap_or(&current.cron_expression);
        let cron = CronExpression::parse(expression)?;
        let enabled = update.enabled.unwrap_or(current.enabled);

        let record = self.install(workflow_id, cron, enabled, Some(&current)).await;
        tracing::info!(%workflow_id, cron = %record.cron_expression, enabled, "Schedule updated");
        Ok(record)
    }

    pub async fn get_schedule(&self, workflow_id: &str) -> Option<ScheduledWorkflow> {
        self.inner
            .schedules
            .read()
            .await
            .get(workflow_id)
            .map(|entry| entry.record.clone())
    }

    /// All schedules, sorted by workflow id
    pub async fn get_scheduled_workflows(&self) -> Vec<ScheduledWorkflow> {
        let mut records: Vec<_> = self
            .inner
            .schedules
            .read()
            .await
            .values()
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id));
        records
    }

    pub fn validate_cron_expression(expression: &str) -> bool {
        CronExpression::parse(expression).is_ok()
    }

    pub fn get_next_run_time(expression: &str) -> Result<Option<DateTime<Utc>>, CronError> {
        Ok(CronExpression::parse(expression)?.next_run())
    }

    pub async fn get_statistics(&self) -> SchedulerStatistics {
        let schedules = self.inner.schedules.read().await;
        let enabled_schedules = schedules.values().filter(|e| e.record.enabled).count();

        let mut upcoming_runs: Vec<UpcomingRun> = schedules
            .values()
            .filter(|e| e.record.enabled)
            .flat_map(|e| {
                e.cron.upcoming(UPCOMING_RUNS).into_iter().map(move |next_run| UpcomingRun {
                    workflow_id: e.record.workflow_id.clone(),
                    next_run,
                })
            })
            .collect();
        upcoming_runs.sort_by(|a, b| {
            a.next_run
                .cmp(&b.next_run)
                .then_with(|| a.workflow_id.cmp(&b.workflow_id))
        });
        upcoming_runs.truncate(UPCOMING_RUNS);

        SchedulerStatistics {
            total_schedules: schedules.len(),
            enabled_schedules,
            disabled_schedules: schedules.len() - enabled_schedules,
            total_runs: schedules.values().map(|e| e.record.run_count).sum(),
            upcoming_runs,
        }
    }

    /// Run the tick handler for a scheduled workflow immediately
    pub async fn run_now(&self, workflow_id: &str) {
        self.execute_scheduled_workflow(workflow_id).await;
    }

    /// Stop every timer and forget all schedules
    pub async fn shutdown(&self) {
        let entries: Vec<ScheduleEntry> = self
            .inner
            .schedules
            .write()
            .await
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        let count = entries.len();

        let handles = entries
            .into_iter()
            .filter_map(|entry| entry.job)
            .map(CronJob::stop);
        futures::future::join_all(handles).await;

        self.inner.initialized.store(false, Ordering::SeqCst);
        tracing::info!(schedules = count, "Workflow scheduler shut down");
    }

    /// Subscribe to scheduler events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
        self.inner.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.inner.event_bus
    }

    fn spawn_job(&self, workflow_id: &str, cron: CronExpression) -> CronJob {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_timer(
            Arc::downgrade(&self.inner),
            workflow_id.to_string(),
            cron,
            cancel.clone(),
        ));
        CronJob { cancel, handle }
    }

    /// Tick handler. Failures are logged and reported as events, never returned.
    async fn execute_scheduled_workflow(&self, workflow_id: &str) {
        let inner = &self.inner;
        let _running = if inner.config.skip_if_running {
            match RunningGuard::acquire(&inner.running, workflow_id) {
                Some(guard) => Some(guard),
                None => {
                    tracing::info!(%workflow_id, "Previous run still in progress, skipping tick");
                    return;
                }
            }
        } else {
            None
        };

        let cron_expression = {
            let mut schedules = inner.schedules.write().await;
            let Some(entry) = schedules.get_mut(workflow_id) else {
                return;
            };
            if !entry.record.enabled {
                tracing::debug!(%workflow_id, "Schedule disabled, ignoring tick");
                return;
            }
            entry.record.last_run = Some(Utc::now());
            entry.record.run_count += 1;
            entry.record.next_run = entry.cron.next_run();
            entry.record.cron_expression.clone()
        };

        let workflow = match inner.repository.get_workflow(workflow_id).await {
            Ok(Some(workflow)) => workflow,
            Ok(None) => {
                tracing::warn!(%workflow_id, "Scheduled workflow no longer exists, unscheduling");
                let _ = self.unschedule_workflow(workflow_id).await;
                return;
            }
            Err(e) => {
                self.report_failure(workflow_id, &e.to_string());
                return;
            }
        };

        let execution_id = Uuid::new_v4();
        let started = Instant::now();
        let outcome = self
            .run_isolated(workflow, execution_id, &cron_expression)
            .await;

        let result = match &outcome {
            Ok(result) => result.clone(),
            Err(e) => ExecutionResult::failure(
                execution_id,
                started.elapsed().as_millis() as u64,
                e.to_string(),
            ),
        };
        if let Err(e) = inner
            .repository
            .update_workflow_stats(workflow_id, &result)
            .await
        {
            tracing::error!(%workflow_id, error = %e, "Failed to persist run statistics");
        }

        match outcome {
            Ok(result) => {
                tracing::info!(%workflow_id, %execution_id, duration_ms = result.duration, "Scheduled workflow executed");
                inner.event_bus.emit(WorkflowEvent::WorkflowExecuted {
                    workflow_id: workflow_id.to_string(),
                    execution_id: result.execution_id,
                    duration_ms: result.duration,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => self.report_failure(workflow_id, &e.to_string()),
        }
    }

    /// Execute on a fresh engine so repeated ticks share no state
    async fn run_isolated(
        &self,
        workflow: Workflow,
        execution_id: ExecutionId,
        cron_expression: &str,
    ) -> Result<ExecutionResult, FlowError> {
        let registry = self.inner.registry.read().await.snapshot();
        let engine = WorkflowEngine::with_registry(registry, self.inner.config.runtime.clone());

        let workflow_id = workflow.id.clone();
        engine.register_workflow(workflow).await?;

        let trigger = Value::Object(HashMap::from([
            ("trigger".to_string(), Value::from("schedule")),
            ("cron_expression".to_string(), Value::from(cron_expression)),
            ("scheduled_at".to_string(), Value::from(Utc::now().to_rfc3339())),
        ]));
        let options = ExecutionOptions {
            user: Some(self.inner.config.user.clone()),
            execution_id: Some(execution_id),
        };
        engine
            .execute_workflow(&workflow_id, Some(trigger), options)
            .await
    }

    fn report_failure(&self, workflow_id: &str, error: &str) {
        tracing::error!(%workflow_id, %error, "Scheduled workflow execution failed");
        self.inner
            .event_bus
            .emit(WorkflowEvent::WorkflowExecutionFailed {
                workflow_id: workflow_id.to_string(),
                error: error.to_string(),
                timestamp: Utc::now(),
            });
    }
}

/// Timer loop for one schedule: sleep until the next fire time, then hand
/// the tick to its own task so a slow run never delays the next tick.
async fn run_timer(
    inner: Weak<SchedulerInner>,
    workflow_id: WorkflowId,
    cron: CronExpression,
    cancel: CancellationToken,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;

    loop {
        let after = last_fire.map_or_else(Utc::now, |prev| prev.max(Utc::now()));
        let Some(fire_at) = cron.next_after(after) else {
            tracing::debug!(%workflow_id, "Cron expression has no upcoming runs");
            break;
        };
        let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => break,
        }
        last_fire = Some(fire_at);

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let scheduler = WorkflowScheduler { inner };
        let workflow_id = workflow_id.clone();
        tracing::debug!(%workflow_id, %fire_at, "Cron tick");
        tokio::spawn(async move {
            scheduler.execute_scheduled_workflow(&workflow_id).await;
        });
    }
}
