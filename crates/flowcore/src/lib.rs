//! Core abstractions for the flow engine
//!
//! This crate provides the shared workflow, execution and node types, the
//! executor plugin trait, edge conditions and the event surface. It contains
//! no execution logic.

mod condition;
mod error;
pub mod events;
mod execution;
mod node;
mod value;
mod workflow;

pub use condition::{CompareOp, ConditionError, EdgeCondition, Expr, MAX_CONDITION_DEPTH};
pub use error::{FlowError, NodeError, ValidationIssue, WorkflowError};
pub use events::*;
pub use execution::{
    ExecutionContext, ExecutionId, ExecutionOptions, ExecutionResult, ExecutionState,
    NodeFailure, SharedExecutionContext,
};
pub use node::{
    InvalidCategory, NodeCategory, NodeConfig, NodeContext, NodeExecutor, NodeId, NodeSchema,
    PortDefinition,
};
pub use value::Value;
pub use workflow::{
    TriggerSpec, TriggerType, Workflow, WorkflowEdge, WorkflowId, WorkflowMetadata, WorkflowNode,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
