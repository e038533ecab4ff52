use crate::{execution::SharedExecutionContext, NodeError, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type NodeId = String;

/// Node configuration as written in the workflow definition
pub type NodeConfig = HashMap<String, Value>;

/// Core trait that all executable node plugins implement
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Execute the node with the resolved inputs and configuration
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError>;

    /// Optional: self-describing schema. When `None` the registry falls back
    /// to the ports declared on the node definition.
    fn schema(&self) -> Option<NodeSchema> {
        None
    }

    /// Optional: check a node's configuration before it runs. `None` means
    /// the executor does not validate and any config is accepted.
    fn validate(&self, _config: &NodeConfig) -> Option<bool> {
        None
    }
}

/// Context handed to an executor for a single node invocation
#[derive(Clone)]
pub struct NodeContext {
    pub execution_id: Uuid,

    /// Id of the workflow node being executed
    pub node_id: NodeId,

    /// Inputs after `$node` / `context.` references were resolved
    pub inputs: HashMap<String, Value>,

    /// Static configuration for this node
    pub config: NodeConfig,

    /// The run's execution context, shared with the engine
    pub execution: SharedExecutionContext,

    /// Tripped when the run is cancelled
    pub cancellation: CancellationToken,
}

impl NodeContext {
    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.config
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }

    /// Inputs as an object value
    pub fn inputs_value(&self) -> Value {
        Value::Object(self.inputs.clone())
    }

    /// Fail fast if the run was cancelled
    pub fn check_cancelled(&self) -> Result<(), NodeError> {
        if self.cancellation.is_cancelled() {
            return Err(NodeError::Cancelled);
        }
        Ok(())
    }
}

/// Closed set of node categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeCategory {
    Trigger,
    Action,
    Condition,
    Loop,
    Transform,
    Integration,
    Utility,
    Output,
}

impl NodeCategory {
    pub const ALL: [NodeCategory; 8] = [
        NodeCategory::Trigger,
        NodeCategory::Action,
        NodeCategory::Condition,
        NodeCategory::Loop,
        NodeCategory::Transform,
        NodeCategory::Integration,
        NodeCategory::Utility,
        NodeCategory::Output,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeCategory::Trigger => "trigger",
            NodeCategory::Action => "action",
            NodeCategory::Condition => "condition",
            NodeCategory::Loop => "loop",
            NodeCategory::Transform => "transform",
            NodeCategory::Integration => "integration",
            NodeCategory::Utility => "utility",
            NodeCategory::Output => "output",
        }
    }
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid node category: {0}")]
pub struct InvalidCategory(pub String);

impl FromStr for NodeCategory {
    type Err = InvalidCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeCategory::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| InvalidCategory(s.to_string()))
    }
}

/// Declared input or output of a node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub port_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl PortDefinition {
    pub fn required(name: impl Into<String>, port_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port_type: port_type.into(),
            description: String::new(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, port_type: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, port_type)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Introspectable shape of a node type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSchema {
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}
