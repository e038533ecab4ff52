use crate::param;
use async_trait::async_trait;
use flowcore::{NodeCategory, NodeContext, NodeError, NodeExecutor, PortDefinition, Value};
use flowruntime::NodeDefinition;
use std::collections::HashMap;
use std::sync::Arc;

/// Parse JSON string to Value
pub struct JsonParseNode;

#[async_trait]
impl NodeExecutor for JsonParseNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let input = param(&ctx, "json").ok_or_else(|| NodeError::MissingInput("json".to_string()))?;
        let text = input.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: "json".to_string(),
            expected: "string".to_string(),
            actual: input.type_name().to_string(),
        })?;

        let parsed: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| NodeError::failed(format!("JSON parse error: {}", e)))?;

        Ok(Value::Object(HashMap::from([(
            "parsed".to_string(),
            Value::from(parsed),
        )])))
    }
}

pub(crate) fn json_parse_definition() -> NodeDefinition {
    NodeDefinition::new("transform.json_parse", NodeCategory::Transform, Arc::new(JsonParseNode))
        .with_label("Parse JSON")
        .with_description("Parse JSON string")
        .with_input(PortDefinition::required("json", "string"))
        .with_output(PortDefinition::required("parsed", "any"))
}

/// Stringify Value to JSON
pub struct JsonStringifyNode;

#[async_trait]
impl NodeExecutor for JsonStringifyNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let value = param(&ctx, "value").ok_or_else(|| NodeError::MissingInput("value".to_string()))?;

        let pretty = ctx.get_config_or("pretty", Value::Bool(true)).is_truthy();
        let json = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(|e| NodeError::failed(format!("JSON stringify error: {}", e)))?;

        Ok(Value::Object(HashMap::from([(
            "json".to_string(),
            Value::from(json),
        )])))
    }
}

pub(crate) fn json_stringify_definition() -> NodeDefinition {
    NodeDefinition::new(
        "transform.json_stringify",
        NodeCategory::Transform,
        Arc::new(JsonStringifyNode),
    )
    .with_label("Stringify JSON")
    .with_description("Convert value to JSON string")
    .with_input(PortDefinition::required("value", "any"))
    .with_output(PortDefinition::required("json", "string"))
}
