// crates/flowruntime/tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use flowcore::{
    NodeCategory, NodeContext, NodeError, NodeExecutor, SharedExecutionContext, Value,
    Workflow, WorkflowNode,
};
use flowruntime::{NodeDefinition, NodeRegistry};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

/// Returns its resolved inputs merged over its config
pub struct EchoNode;

#[async_trait]
impl NodeExecutor for EchoNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let mut output = ctx.config.clone();
        output.extend(ctx.inputs.clone());
        Ok(Value::Object(output))
    }
}

/// Always fails with the configured message
pub struct FailNode(pub &'static str);

#[async_trait]
impl NodeExecutor for FailNode {
    async fn execute(&self, _ctx: NodeContext) -> Result<Value, NodeError> {
        Err(NodeError::failed(self.0))
    }
}

/// Fails like [`FailNode`] but keeps a handle on the run's context
#[derive(Default)]
pub struct CapturingFailNode {
    pub captured: Mutex<Option<SharedExecutionContext>>,
}

#[async_trait]
impl NodeExecutor for CapturingFailNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        *self.captured.lock().unwrap() = Some(ctx.execution.clone());
        Err(NodeError::failed("boom"))
    }
}

/// Sleeps, returning early if the run is cancelled
pub struct SlowNode(pub Duration);

#[async_trait]
impl NodeExecutor for SlowNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        tokio::select! {
            _ = tokio::time::sleep(self.0) => Ok(Value::from(ctx.node_id.as_str())),
            _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
        }
    }
}

/// Sleeps to completion without looking at the cancellation token
pub struct StubbornNode(pub Duration);

#[async_trait]
impl NodeExecutor for StubbornNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        tokio::time::sleep(self.0).await;
        Ok(Value::from(ctx.node_id.as_str()))
    }
}

pub fn definition(node_type: &str, executor: Arc<dyn NodeExecutor>) -> NodeDefinition {
    NodeDefinition::new(node_type, NodeCategory::Utility, executor)
        .with_label(node_type)
        .with_description(format!("Test node {node_type}"))
}

/// Registry with `echo`, `fail` (message "boom") and `slow` (200ms)
pub fn test_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry
        .register_bulk_nodes([
            definition("echo", Arc::new(EchoNode)),
            definition("fail", Arc::new(FailNode("boom"))),
            definition("slow", Arc::new(SlowNode(Duration::from_millis(200)))),
        ])
        .unwrap();
    registry
}

/// Single-node echo workflow
pub fn echo_workflow(id: &str) -> Workflow {
    Workflow::new(id, format!("Workflow {id}"))
        .with_node(WorkflowNode::new("n1", "echo").start())
}
