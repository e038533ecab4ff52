use flowcore::{NodeCategory, NodeConfig, NodeExecutor, NodeSchema, PortDefinition, Value};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Optional config validator attached to a node type
pub type ConfigValidator = Arc<dyn Fn(&NodeConfig) -> bool + Send + Sync>;

#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    #[error("Node type already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Invalid node definition for '{node_type}': {reason}")]
    InvalidDefinition { node_type: String, reason: String },

    #[error("Node type not found: {0}")]
    NotFound(String),
}

/// Failures collected by [`NodeRegistry::register_bulk_nodes`]
#[derive(Error, Debug, Clone)]
#[error("Failed to register {} node type(s): {}", .failures.len(), summarize(.failures))]
pub struct BulkRegistrationError {
    pub registered: usize,
    pub failures: Vec<RegistryError>,
}

fn summarize(failures: &[RegistryError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A node type: metadata plus the executor that runs it
#[derive(Clone)]
pub struct NodeDefinition {
    pub node_type: String,
    pub category: NodeCategory,
    pub label: String,
    pub description: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
    /// Static description of accepted configuration
    pub config: Option<Value>,
    pub validator: Option<ConfigValidator>,
    pub executor: Arc<dyn NodeExecutor>,
}

impl NodeDefinition {
    pub fn new(
        node_type: impl Into<String>,
        category: NodeCategory,
        executor: Arc<dyn NodeExecutor>,
    ) -> Self {
        Self {
            node_type: node_type.into(),
            category,
            label: String::new(),
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            config: None,
            validator: None,
            executor,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input(mut self, port: PortDefinition) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn with_output(mut self, port: PortDefinition) -> Self {
        self.outputs.push(port);
        self
    }

    pub fn with_config_schema(mut self, schema: impl Into<Value>) -> Self {
        self.config = Some(schema.into());
        self
    }

    /// Override the executor's own validation for this node type
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&NodeConfig) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Validate a config: the definition override wins over the executor
    pub fn validate_config(&self, config: &NodeConfig) -> Option<bool> {
        match &self.validator {
            Some(validate) => Some(validate(config)),
            None => self.executor.validate(config),
        }
    }

    pub fn has_validator(&self) -> bool {
        self.validator.is_some() || self.executor.validate(&NodeConfig::new()).is_some()
    }

    fn check(&self) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidDefinition {
            node_type: self.node_type.clone(),
            reason: reason.to_string(),
        };

        if self.node_type.trim().is_empty() {
            return Err(invalid("type is required"));
        }
        if self.label.trim().is_empty() {
            return Err(invalid("label is required"));
        }
        if self.description.trim().is_empty() {
            return Err(invalid("description is required"));
        }
        let ports = self.inputs.iter().chain(self.outputs.iter());
        for port in ports {
            if port.name.trim().is_empty() || port.port_type.trim().is_empty() {
                return Err(invalid("every input and output needs a name and a type"));
            }
        }
        Ok(())
    }

    fn matches(&self, needle: &str) -> bool {
        [
            self.node_type.as_str(),
            self.label.as_str(),
            self.description.as_str(),
            self.category.as_str(),
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
    }
}

impl fmt::Debug for NodeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDefinition")
            .field("node_type", &self.node_type)
            .field("category", &self.category)
            .field("label", &self.label)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("has_validator", &self.has_validator())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStatistics {
    pub total_nodes: usize,
    pub nodes_by_category: BTreeMap<NodeCategory, usize>,
    pub nodes_with_validator: usize,
}

/// Registry of available node types
#[derive(Clone, Default)]
pub struct NodeRegistry {
    definitions: HashMap<String, NodeDefinition>,
    by_category: HashMap<NodeCategory, Vec<String>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type
    pub fn register_node(&mut self, definition: NodeDefinition) -> Result<(), RegistryError> {
        if self.definitions.contains_key(&definition.node_type) {
            return Err(RegistryError::AlreadyRegistered(definition.node_type));
        }
        definition.check()?;

        tracing::info!(
            node_type = %definition.node_type,
            category = %definition.category,
            "Registering node type"
        );
        self.by_category
            .entry(definition.category)
            .or_default()
            .push(definition.node_type.clone());
        self.definitions
            .insert(definition.node_type.clone(), definition);
        Ok(())
    }

    /// Register many node types, keeping the ones that succeed
    pub fn register_bulk_nodes(
        &mut self,
        definitions: impl IntoIterator<Item = NodeDefinition>,
    ) -> Result<usize, BulkRegistrationError> {
        let mut registered = 0;
        let mut failures = Vec::new();
        for definition in definitions {
            match self.register_node(definition) {
                Ok(()) => registered += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping node type during bulk registration");
                    failures.push(e);
                }
            }
        }
        if failures.is_empty() {
            Ok(registered)
        } else {
            Err(BulkRegistrationError {
                registered,
                failures,
            })
        }
    }

    pub fn unregister_node(&mut self, node_type: &str) -> Option<NodeDefinition> {
        let removed = self.definitions.remove(node_type)?;
        if let Some(types) = self.by_category.get_mut(&removed.category) {
            types.retain(|t| t != node_type);
        }
        tracing::info!(node_type, "Unregistered node type");
        Some(removed)
    }

    pub fn has_node(&self, node_type: &str) -> bool {
        self.definitions.contains_key(node_type)
    }

    pub fn get_node(&self, node_type: &str) -> Result<&NodeDefinition, RegistryError> {
        self.definitions
            .get(node_type)
            .ok_or_else(|| RegistryError::NotFound(node_type.to_string()))
    }

    pub fn get_node_definition(&self, node_type: &str) -> Option<&NodeDefinition> {
        self.definitions.get(node_type)
    }

    /// Definitions in a category, in registration order
    pub fn get_nodes_by_category(&self, category: NodeCategory) -> Vec<&NodeDefinition> {
        self.by_category
            .get(&category)
            .map(|types| {
                types
                    .iter()
                    .filter_map(|t| self.definitions.get(t))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All definitions, sorted by type
    pub fn get_all_nodes(&self) -> Vec<&NodeDefinition> {
        let mut nodes: Vec<_> = self.definitions.values().collect();
        nodes.sort_by(|a, b| a.node_type.cmp(&b.node_type));
        nodes
    }

    /// Every category with its definitions, including empty ones
    pub fn get_all_categories(&self) -> Vec<(NodeCategory, Vec<&NodeDefinition>)> {
        NodeCategory::ALL
            .into_iter()
            .map(|category| (category, self.get_nodes_by_category(category)))
            .collect()
    }

    /// Get all registered node types
    pub fn list_node_types(&self) -> Vec<String> {
        self.get_all_nodes()
            .into_iter()
            .map(|d| d.node_type.clone())
            .collect()
    }

    /// Case-insensitive substring search over type, label, description and category
    pub fn search_nodes(&self, query: &str) -> Vec<&NodeDefinition> {
        let needle = query.to_lowercase();
        self.get_all_nodes()
            .into_iter()
            .filter(|d| d.matches(&needle))
            .collect()
    }

    /// Run the type's validator; types without one accept any config
    pub fn validate_node_config(
        &self,
        node_type: &str,
        config: &NodeConfig,
    ) -> Result<bool, RegistryError> {
        let definition = self.get_node(node_type)?;
        Ok(definition.validate_config(config).unwrap_or(true))
    }

    /// Executor-provided schema, falling back to the declared ports
    pub fn get_node_schema(&self, node_type: &str) -> Option<NodeSchema> {
        let definition = self.definitions.get(node_type)?;
        Some(definition.executor.schema().unwrap_or_else(|| NodeSchema {
            inputs: definition.inputs.clone(),
            outputs: definition.outputs.clone(),
            config: definition.config.clone(),
        }))
    }

    pub fn get_statistics(&self) -> RegistryStatistics {
        let nodes_by_category = NodeCategory::ALL
            .into_iter()
            .map(|category| {
                let count = self.by_category.get(&category).map_or(0, Vec::len);
                (category, count)
            })
            .collect();
        RegistryStatistics {
            total_nodes: self.definitions.len(),
            nodes_by_category,
            nodes_with_validator: self
                .definitions
                .values()
                .filter(|d| d.has_validator())
                .count(),
        }
    }

    /// Independent copy of the catalog; executors are shared
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
