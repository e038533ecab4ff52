use async_trait::async_trait;
use flowcore::{NodeCategory, NodeContext, NodeError, NodeExecutor, PortDefinition, Value};
use flowruntime::NodeDefinition;
use std::sync::Arc;

/// Returns its configuration overlaid with its resolved inputs
pub struct EchoNode;

#[async_trait]
impl NodeExecutor for EchoNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let mut output = ctx.config;
        output.extend(ctx.inputs);
        Ok(Value::Object(output))
    }
}

pub(crate) fn definition() -> NodeDefinition {
    NodeDefinition::new("echo", NodeCategory::Utility, Arc::new(EchoNode))
        .with_label("Echo")
        .with_description("Return the node's config and inputs as a single object")
        .with_output(PortDefinition::optional("value", "object"))
}
