//! Persistence boundary used by the scheduler.

use crate::loader::{self, LoadError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowcore::{ExecutionId, ExecutionResult, Workflow, WorkflowId};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Storage of workflow definitions and their run statistics
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, RepositoryError>;

    async fn list_workflows(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Workflow>, RepositoryError>;

    /// Store a new workflow; an empty id is replaced by a generated one
    async fn create_workflow(&self, workflow: Workflow) -> Result<WorkflowId, RepositoryError>;

    async fn update_workflow_stats(
        &self,
        id: &str,
        result: &ExecutionResult,
    ) -> Result<(), RepositoryError>;
}

/// Aggregated run statistics for one workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_execution_id: Option<ExecutionId>,
    pub last_duration_ms: Option<u64>,
    pub last_error: Option<String>,
}

impl WorkflowStats {
    fn record(&mut self, result: &ExecutionResult) {
        self.total_runs += 1;
        if result.success {
            self.successful_runs += 1;
        } else {
            self.failed_runs += 1;
        }
        self.last_run_at = Some(Utc::now());
        self.last_execution_id = Some(result.execution_id);
        self.last_duration_ms = Some(result.duration);
        self.last_error = result.error.clone();
    }
}

fn prepare_for_create(mut workflow: Workflow) -> Workflow {
    if workflow.id.trim().is_empty() {
        workflow.id = Uuid::new_v4().to_string();
    }
    let now = Utc::now();
    workflow.metadata.created_at = now;
    workflow.metadata.updated_at = now;
    workflow
}

/// Repository kept entirely in memory
#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: RwLock<BTreeMap<WorkflowId, Workflow>>,
    stats: RwLock<HashMap<WorkflowId, WorkflowStats>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn remove_workflow(&self, id: &str) -> Option<Workflow> {
        self.workflows.write().await.remove(id)
    }

    pub async fn stats(&self, id: &str) -> Option<WorkflowStats> {
        self.stats.read().await.get(id).cloned()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self.workflows.read().await.get(id).cloned())
    }

    async fn list_workflows(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        Ok(self
            .workflows
            .read()
            .await
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create_workflow(&self, workflow: Workflow) -> Result<WorkflowId, RepositoryError> {
        let workflow = prepare_for_create(workflow);
        let id = workflow.id.clone();
        self.workflows.write().await.insert(id.clone(), workflow);
        Ok(id)
    }

    async fn update_workflow_stats(
        &self,
        id: &str,
        result: &ExecutionResult,
    ) -> Result<(), RepositoryError> {
        if !self.workflows.read().await.contains_key(id) {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        self.stats
            .write()
            .await
            .entry(id.to_string())
            .or_default()
            .record(result);
        Ok(())
    }
}

/// Repository over a directory of `<id>.json` workflow files.
///
/// Definitions are re-read on every lookup so edits on disk are picked up by
/// the next scheduler tick. Statistics are kept in memory.
pub struct FileWorkflowRepository {
    dir: PathBuf,
    stats: RwLock<HashMap<WorkflowId, WorkflowStats>>,
}

impl FileWorkflowRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stats: RwLock::new(HashMap::new()),
        }
    }

    pub async fn stats(&self, id: &str) -> Option<WorkflowStats> {
        self.stats.read().await.get(id).cloned()
    }
}

#[async_trait]
impl WorkflowRepository for FileWorkflowRepository {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, RepositoryError> {
        let workflows = loader::load_workflows_from_dir(&self.dir).await?;
        Ok(workflows.into_iter().find(|w| w.id == id))
    }

    async fn list_workflows(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let workflows = loader::load_workflows_from_dir(&self.dir).await?;
        Ok(workflows.into_iter().skip(offset).take(limit).collect())
    }

    async fn create_workflow(&self, workflow: Workflow) -> Result<WorkflowId, RepositoryError> {
        let workflow = prepare_for_create(workflow);
        let path = loader::save_workflow(&self.dir, &workflow).await?;
        tracing::info!(workflow_id = %workflow.id, path = %path.display(), "Saved workflow");
        Ok(workflow.id)
    }

    async fn update_workflow_stats(
        &self,
        id: &str,
        result: &ExecutionResult,
    ) -> Result<(), RepositoryError> {
        let mut stats = self.stats.write().await;
        let entry = stats.entry(id.to_string()).or_default();
        entry.record(result);
        tracing::info!(
            workflow_id = id,
            total_runs = entry.total_runs,
            failed_runs = entry.failed_runs,
            "Updated workflow stats"
        );
        Ok(())
    }
}
