use async_trait::async_trait;
use flowcore::{NodeCategory, NodeConfig, NodeContext, NodeError, NodeExecutor, Value};
use flowruntime::NodeDefinition;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

const DEFAULT_DELAY_MS: f64 = 1000.0;

/// Delay execution for a specified duration
pub struct DelayNode;

#[async_trait]
impl NodeExecutor for DelayNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let delay_ms = ctx
            .config
            .get("delay_ms")
            .and_then(|v| v.as_f64())
            .unwrap_or(DEFAULT_DELAY_MS)
            .max(0.0) as u64;

        tracing::debug!(node_id = %ctx.node_id, delay_ms, "Delaying");

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }

        // Pass through any inputs
        Ok(ctx.inputs_value())
    }

    fn validate(&self, config: &NodeConfig) -> Option<bool> {
        Some(valid_delay(config))
    }
}

fn valid_delay(config: &NodeConfig) -> bool {
    config
        .get("delay_ms")
        .map_or(true, |v| v.as_f64().is_some_and(|ms| ms >= 0.0))
}

pub(crate) fn definition() -> NodeDefinition {
    NodeDefinition::new("time.delay", NodeCategory::Utility, Arc::new(DelayNode))
        .with_label("Delay")
        .with_description("Delay execution for specified milliseconds")
        .with_config_schema(serde_json::json!({ "delay_ms": "number" }))
}
