use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("Execution already active: {0}")]
    ExecutionAlreadyActive(Uuid),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// A node executor failed. Displays the executor's error verbatim.
    #[error("{source}")]
    Execution {
        node_id: String,
        #[source]
        source: NodeError,
    },

    #[error("Execution {execution_id} was cancelled")]
    Cancelled { execution_id: Uuid },

    #[error("Execution {execution_id} cannot be {action} while {state}")]
    InvalidState {
        execution_id: Uuid,
        action: &'static str,
        state: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    /// Whether this error is the cancellation of a run
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FlowError::Cancelled { .. })
    }
}

/// Errors raised by node executors
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    ExecutionFailed(String),

    #[error("Cancelled")]
    Cancelled,
}

impl NodeError {
    /// Shorthand for an executor failure carrying only a message
    pub fn failed(message: impl Into<String>) -> Self {
        NodeError::ExecutionFailed(message.into())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow validation failed: {}", join_issues(.0))]
    Validation(Vec<ValidationIssue>),
}

impl WorkflowError {
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            WorkflowError::Validation(issues) => issues,
        }
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single structural or semantic problem found in a workflow definition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    #[error("Workflow must have an id")]
    MissingId,

    #[error("Workflow must have a name")]
    MissingName,

    #[error("Workflow must have at least one node")]
    NoNodes,

    #[error("Workflow must have a start node")]
    NoStartNode,

    #[error("Workflow can only have one start node (found {0})")]
    MultipleStartNodes(usize),

    #[error("Edge references non-existent node: {0}")]
    DanglingEdge(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Workflow contains cycles")]
    Cycle,

    #[error("Invalid edge condition on {source_node_id} -> {target_node_id}: {reason}")]
    InvalidCondition {
        source_node_id: String,
        target_node_id: String,
        reason: String,
    },
}
