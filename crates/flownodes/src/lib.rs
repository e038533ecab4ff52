//! Standard node library
//!
//! Collection of built-in nodes for common operations

mod condition;
mod debug;
mod echo;
mod http;
mod time;
mod transform;

pub use condition::ConditionNode;
pub use debug::DebugNode;
pub use echo::EchoNode;
pub use http::HttpRequestNode;
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode};

use flowcore::{NodeContext, Value};
use flowruntime::{BulkRegistrationError, NodeDefinition, NodeRegistry};

/// Definitions for every standard node
pub fn definitions() -> Vec<NodeDefinition> {
    vec![
        echo::definition(),
        debug::definition(),
        time::definition(),
        transform::json_parse_definition(),
        transform::json_stringify_definition(),
        http::definition(),
        condition::definition(),
    ]
}

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) -> Result<usize, BulkRegistrationError> {
    registry.register_bulk_nodes(definitions())
}

/// Look a parameter up in the resolved inputs, then in the static config
pub(crate) fn param<'a>(ctx: &'a NodeContext, name: &str) -> Option<&'a Value> {
    ctx.inputs.get(name).or_else(|| ctx.config.get(name))
}
