use crate::param;
use async_trait::async_trait;
use flowcore::{NodeCategory, NodeContext, NodeError, NodeExecutor, PortDefinition, Value};
use flowruntime::NodeDefinition;
use std::collections::HashMap;
use std::sync::Arc;

/// Simple debug node that logs its inputs
pub struct DebugNode;

#[async_trait]
impl NodeExecutor for DebugNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let message = param(&ctx, "message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)")
            .to_string();

        tracing::info!(execution_id = %ctx.execution_id, node_id = %ctx.node_id, "DEBUG: {}", message);

        // Also log all inputs for visibility
        for (key, value) in &ctx.inputs {
            tracing::info!(node_id = %ctx.node_id, "  {}: {:?}", key, value);
        }

        Ok(Value::Object(HashMap::from([
            ("message".to_string(), Value::from(message)),
            ("inputs".to_string(), ctx.inputs_value()),
        ])))
    }
}

pub(crate) fn definition() -> NodeDefinition {
    NodeDefinition::new("debug.log", NodeCategory::Output, Arc::new(DebugNode))
        .with_label("Debug Log")
        .with_description("Logs input values for debugging")
        .with_input(PortDefinition::optional("message", "string"))
        .with_output(PortDefinition::optional("message", "string"))
}
