use crate::{NodeId, Value, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Execution context shared between the traversal loop and control calls
pub type SharedExecutionContext = Arc<RwLock<ExecutionContext>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionState::Running => "running",
            ExecutionState::Paused => "paused",
            ExecutionState::Completed => "completed",
            ExecutionState::Failed => "failed",
            ExecutionState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A node failure recorded on the context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node_id: NodeId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-run mutable record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub state: ExecutionState,
    pub current_node_id: Option<NodeId>,
    /// Caller supplied seed, also usable by executors as scratch space
    pub data: Value,
    pub errors: Vec<NodeFailure>,
    pub completed_nodes: Vec<NodeId>,
    /// Nodes queued but not yet executed, refreshed at every checkpoint
    pub pending_nodes: Vec<NodeId>,
    pub user: Option<String>,
}

impl ExecutionContext {
    pub fn new(workflow_id: impl Into<WorkflowId>, data: Value) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            workflow_id: workflow_id.into(),
            start_time: Utc::now(),
            end_time: None,
            state: ExecutionState::Running,
            current_node_id: None,
            data,
            errors: Vec::new(),
            completed_nodes: Vec::new(),
            pending_nodes: Vec::new(),
            user: None,
        }
    }

    /// Move to a terminal state and stamp the end time
    pub fn finish(&mut self, state: ExecutionState) {
        self.state = state;
        self.end_time = Some(Utc::now());
    }

    /// Move to `state` unless another terminal state already won.
    /// Returns false when the execution had already finished.
    pub fn try_finish(&mut self, state: ExecutionState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.finish(state);
        true
    }
}

/// Per-call overrides for an execution
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    pub user: Option<String>,
    /// Caller-allocated execution id; generated when absent
    pub execution_id: Option<ExecutionId>,
}

impl ExecutionOptions {
    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            ..Self::default()
        }
    }
}

/// Result of workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Output of the first node visited (the start node)
    pub data: Value,
    pub execution_id: ExecutionId,
    /// Wall-clock duration in milliseconds
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Output of every node that ran, keyed by node id
    #[serde(default)]
    pub node_outputs: HashMap<NodeId, Value>,
}

impl ExecutionResult {
    /// Result recorded for a run that did not complete
    pub fn failure(execution_id: ExecutionId, duration: u64, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            execution_id,
            duration,
            error: Some(error.into()),
            node_outputs: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_finish_keeps_an_earlier_cancel() {
        let mut ctx = ExecutionContext::new("wf", Value::empty_object());
        ctx.finish(ExecutionState::Cancelled);

        assert!(!ctx.try_finish(ExecutionState::Completed));
        assert!(!ctx.try_finish(ExecutionState::Failed));
        assert_eq!(ctx.state, ExecutionState::Cancelled);
    }

    #[test]
    fn try_finish_completes_a_live_run() {
        let mut ctx = ExecutionContext::new("wf", Value::empty_object());
        ctx.state = ExecutionState::Paused;

        assert!(ctx.try_finish(ExecutionState::Completed));
        assert_eq!(ctx.state, ExecutionState::Completed);
        assert!(ctx.end_time.is_some());
    }
}
