use crate::{EdgeCondition, NodeConfig, NodeId, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type WorkflowId = String;

/// Complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl Workflow {
    pub fn new(id: impl Into<WorkflowId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: default_version(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            metadata: WorkflowMetadata::default(),
            triggers: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: WorkflowNode) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Unconditional edge
    pub fn connect(&mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) {
        self.edges.push(WorkflowEdge::new(source, target));
    }

    /// Edge traversed only when `condition` holds against the source output
    pub fn connect_when(
        &mut self,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        condition: impl Into<String>,
    ) {
        self.edges
            .push(WorkflowEdge::new(source, target).with_condition(condition));
    }

    pub fn with_node(mut self, node: WorkflowNode) -> Self {
        self.add_node(node);
        self
    }

    pub fn with_edge(mut self, edge: WorkflowEdge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerSpec) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn find_node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn start_nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.nodes.iter().filter(|n| n.is_start_node)
    }

    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> {
        self.edges.iter().filter(move |e| e.source_node_id == node_id)
    }

    /// Cron expressions of the enabled cron triggers
    pub fn cron_expressions(&self) -> impl Iterator<Item = &str> {
        self.triggers.iter().filter_map(|trigger| match &trigger.trigger_type {
            TriggerType::Cron { expression } if trigger.enabled => Some(expression.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for WorkflowMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
        }
    }
}

/// Node placed in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub config: NodeConfig,
    /// Literal values, `"$<nodeId>"` references to an earlier node's output,
    /// or `"context.<path>"` lookups into the execution data
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub is_start_node: bool,
}

impl WorkflowNode {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            label: None,
            config: HashMap::new(),
            inputs: HashMap::new(),
            is_start_node: false,
        }
    }

    pub fn start(mut self) -> Self {
        self.is_start_node = true;
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Directed edge between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<EdgeCondition>,
}

impl WorkflowEdge {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source_node_id: source.into(),
            target_node_id: target.into(),
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(EdgeCondition::new(condition));
        self
    }
}

/// Workflow trigger specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub trigger_type: TriggerType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl TriggerSpec {
    pub fn cron(expression: impl Into<String>) -> Self {
        Self {
            trigger_type: TriggerType::Cron {
                expression: expression.into(),
            },
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TriggerType {
    Manual,
    Cron { expression: String },
    Webhook { path: String },
    Event { event_type: String },
}
