use crate::{ExecutionId, NodeId, Value, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle events emitted by the engine and the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkflowEvent {
    WorkflowRegistered {
        workflow_id: WorkflowId,
        name: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowStarted {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    WorkflowFailed {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowPaused {
        execution_id: ExecutionId,
        timestamp: DateTime<Utc>,
    },
    WorkflowResumed {
        execution_id: ExecutionId,
        timestamp: DateTime<Utc>,
    },
    WorkflowCancelled {
        execution_id: ExecutionId,
        timestamp: DateTime<Utc>,
    },
    NodeExecuting {
        execution_id: ExecutionId,
        node_id: NodeId,
        node_type: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: ExecutionId,
        node_id: NodeId,
        output: Value,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        execution_id: ExecutionId,
        node_id: NodeId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowScheduled {
        workflow_id: WorkflowId,
        cron_expression: String,
        enabled: bool,
        next_run: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },
    WorkflowUnscheduled {
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
    WorkflowExecuted {
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    WorkflowExecutionFailed {
        workflow_id: WorkflowId,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    /// Stable wire name, e.g. `workflow:started` or `node:failed`
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowRegistered { .. } => "workflow:registered",
            WorkflowEvent::WorkflowStarted { .. } => "workflow:started",
            WorkflowEvent::WorkflowCompleted { .. } => "workflow:completed",
            WorkflowEvent::WorkflowFailed { .. } => "workflow:failed",
            WorkflowEvent::WorkflowPaused { .. } => "workflow:paused",
            WorkflowEvent::WorkflowResumed { .. } => "workflow:resumed",
            WorkflowEvent::WorkflowCancelled { .. } => "workflow:cancelled",
            WorkflowEvent::NodeExecuting { .. } => "node:executing",
            WorkflowEvent::NodeCompleted { .. } => "node:completed",
            WorkflowEvent::NodeFailed { .. } => "node:failed",
            WorkflowEvent::WorkflowScheduled { .. } => "workflow:scheduled",
            WorkflowEvent::WorkflowUnscheduled { .. } => "workflow:unscheduled",
            WorkflowEvent::WorkflowExecuted { .. } => "workflow:executed",
            WorkflowEvent::WorkflowExecutionFailed { .. } => "workflow:execution-failed",
        }
    }

    /// Execution this event belongs to, if any
    pub fn execution_id(&self) -> Option<ExecutionId> {
        match self {
            WorkflowEvent::WorkflowStarted { execution_id, .. }
            | WorkflowEvent::WorkflowCompleted { execution_id, .. }
            | WorkflowEvent::WorkflowFailed { execution_id, .. }
            | WorkflowEvent::WorkflowPaused { execution_id, .. }
            | WorkflowEvent::WorkflowResumed { execution_id, .. }
            | WorkflowEvent::WorkflowCancelled { execution_id, .. }
            | WorkflowEvent::NodeExecuting { execution_id, .. }
            | WorkflowEvent::NodeCompleted { execution_id, .. }
            | WorkflowEvent::NodeFailed { execution_id, .. }
            | WorkflowEvent::WorkflowExecuted { execution_id, .. } => Some(*execution_id),
            _ => None,
        }
    }
}

/// Fan-out of events to every subscriber
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: WorkflowEvent) {
        tracing::trace!(event = event.name(), "Emitting event");
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
