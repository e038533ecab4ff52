use async_trait::async_trait;
use flowcore::{
    EdgeCondition, NodeCategory, NodeConfig, NodeContext, NodeError, NodeExecutor,
    PortDefinition, Value,
};
use flowruntime::NodeDefinition;
use std::sync::Arc;

/// Evaluates a boolean expression against its inputs.
///
/// Outputs the inputs plus a `result` flag, so outgoing edges can branch on
/// `result == true` / `!result`.
pub struct ConditionNode;

#[async_trait]
impl NodeExecutor for ConditionNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let expression = ctx
            .require_config("expression")?
            .as_str()
            .ok_or_else(|| NodeError::Configuration("expression must be a string".to_string()))?
            .to_string();

        let inputs = ctx.inputs_value();
        let result = EdgeCondition::new(expression.as_str())
            .evaluate(&inputs)
            .map_err(|e| NodeError::Configuration(e.to_string()))?;

        tracing::debug!(node_id = %ctx.node_id, %expression, result, "Condition evaluated");
        let mut output = ctx.inputs;
        output.insert("result".to_string(), Value::from(result));
        Ok(Value::Object(output))
    }

    fn validate(&self, config: &NodeConfig) -> Option<bool> {
        Some(valid_expression(config))
    }
}

fn valid_expression(config: &NodeConfig) -> bool {
    config
        .get("expression")
        .and_then(|v| v.as_str())
        .is_some_and(|expr| EdgeCondition::new(expr).parse().is_ok())
}

pub(crate) fn definition() -> NodeDefinition {
    NodeDefinition::new("logic.condition", NodeCategory::Condition, Arc::new(ConditionNode))
        .with_label("Condition")
        .with_description("Evaluate an expression over the inputs and expose the boolean result")
        .with_output(PortDefinition::required("result", "boolean"))
        .with_config_schema(serde_json::json!({ "expression": "string" }))
}
