use crate::registry::NodeRegistry;
use chrono::Utc;
use flowcore::{
    EventBus, ExecutionId, ExecutionResult, ExecutionState, FlowError, NodeContext, NodeFailure,
    NodeId, SharedExecutionContext, ValidationIssue, Value, Workflow, WorkflowError,
    WorkflowEvent, WorkflowNode,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;

/// Out-of-band signals for a running execution
#[derive(Debug, Default)]
pub(crate) struct ExecutionControl {
    pub(crate) resumed: Notify,
    pub(crate) cancellation: CancellationToken,
}

/// Runs a single workflow execution: breadth-first traversal from the start
/// node, one node at a time.
pub struct WorkflowExecutor {
    registry: Arc<RwLock<NodeRegistry>>,
    event_bus: Arc<EventBus>,
}

struct Traversal {
    first_output: Value,
    node_outputs: HashMap<NodeId, Value>,
}

impl WorkflowExecutor {
    pub fn new(registry: Arc<RwLock<NodeRegistry>>, event_bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            event_bus,
        }
    }

    /// Execute a workflow and return results
    pub(crate) async fn execute(
        &self,
        workflow: &Workflow,
        context: &SharedExecutionContext,
        control: &ExecutionControl,
    ) -> Result<ExecutionResult, FlowError> {
        let start_time = Instant::now();
        let execution_id = context.read().await.execution_id;

        let outcome = self.traverse(workflow, context, control, execution_id).await;
        let duration = start_time.elapsed().as_millis() as u64;

        match outcome {
            Ok(traversal) => {
                if !context.write().await.try_finish(ExecutionState::Completed) {
                    tracing::info!(%execution_id, workflow_id = %workflow.id, "Workflow cancelled after its last node");
                    return Err(FlowError::Cancelled { execution_id });
                }
                tracing::info!(%execution_id, workflow_id = %workflow.id, duration_ms = duration, "Workflow completed");
                self.event_bus.emit(WorkflowEvent::WorkflowCompleted {
                    execution_id,
                    workflow_id: workflow.id.clone(),
                    duration_ms: duration,
                    timestamp: Utc::now(),
                });
                Ok(ExecutionResult {
                    success: true,
                    data: traversal.first_output,
                    execution_id,
                    duration,
                    error: None,
                    node_outputs: traversal.node_outputs,
                })
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!(%execution_id, workflow_id = %workflow.id, "Workflow cancelled");
                Err(e)
            }
            Err(e) => {
                if !context.write().await.try_finish(ExecutionState::Failed) {
                    tracing::info!(%execution_id, workflow_id = %workflow.id, error = %e, "Workflow cancelled before its failure was recorded");
                    return Err(FlowError::Cancelled { execution_id });
                }
                tracing::error!(%execution_id, workflow_id = %workflow.id, error = %e, "Workflow failed");
                self.event_bus.emit(WorkflowEvent::WorkflowFailed {
                    execution_id,
                    workflow_id: workflow.id.clone(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    async fn traverse(
        &self,
        workflow: &Workflow,
        context: &SharedExecutionContext,
        control: &ExecutionControl,
        execution_id: ExecutionId,
    ) -> Result<Traversal, FlowError> {
        let start = workflow
            .start_nodes()
            .next()
            .ok_or_else(|| WorkflowError::Validation(vec![ValidationIssue::NoStartNode]))?;

        let mut queue = VecDeque::from([start.id.clone()]);
        let mut visited = HashSet::new();
        let mut results: HashMap<NodeId, Value> = HashMap::new();
        let mut first_output = None;

        loop {
            self.checkpoint(context, control, &queue, execution_id).await?;

            let Some(node_id) = queue.pop_front() else {
                break;
            };
            // First arrival wins; later arrivals through other edges are dropped
            if !visited.insert(node_id.clone()) {
                continue;
            }

            let node = workflow
                .find_node(&node_id)
                .ok_or_else(|| WorkflowError::Validation(vec![ValidationIssue::DanglingEdge(node_id.clone())]))?;

            let output = self
                .execute_node(node, context, control, &results, execution_id)
                .await?;

            for edge in workflow.outgoing_edges(&node_id) {
                let traverse = match &edge.condition {
                    None => true,
                    Some(condition) => condition.evaluate(&output).unwrap_or_else(|e| {
                        tracing::warn!(
                            source = %edge.source_node_id,
                            target = %edge.target_node_id,
                            error = %e,
                            "Edge condition could not be evaluated, skipping edge"
                        );
                        false
                    }),
                };
                if traverse {
                    queue.push_back(edge.target_node_id.clone());
                }
            }

            if first_output.is_none() {
                first_output = Some(output.clone());
            }
            results.insert(node_id, output);
        }

        // A cancel that landed while the last node was running still wins
        self.checkpoint(context, control, &queue, execution_id).await?;

        Ok(Traversal {
            first_output: first_output.unwrap_or_default(),
            node_outputs: results,
        })
    }

    async fn execute_node(
        &self,
        node: &WorkflowNode,
        context: &SharedExecutionContext,
        control: &ExecutionControl,
        results: &HashMap<NodeId, Value>,
        execution_id: ExecutionId,
    ) -> Result<Value, FlowError> {
        let inputs = {
            let mut ctx = context.write().await;
            ctx.current_node_id = Some(node.id.clone());
            resolve_inputs(&node.inputs, results, &ctx.data)
        };

        self.event_bus.emit(WorkflowEvent::NodeExecuting {
            execution_id,
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            timestamp: Utc::now(),
        });
        tracing::debug!(%execution_id, node_id = %node.id, node_type = %node.node_type, "Executing node");

        let executor = {
            let registry = self.registry.read().await;
            registry
                .get_node(&node.node_type)
                .map(|definition| definition.executor.clone())
                .map_err(|_| {
                    WorkflowError::Validation(vec![ValidationIssue::UnknownNodeType(
                        node.node_type.clone(),
                    )])
                })?
        };

        let node_ctx = NodeContext {
            execution_id,
            node_id: node.id.clone(),
            inputs,
            config: node.config.clone(),
            execution: context.clone(),
            cancellation: control.cancellation.clone(),
        };

        let started = Instant::now();
        match executor.execute(node_ctx).await {
            Ok(output) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                tracing::info!(%execution_id, node_id = %node.id, duration_ms, "Node completed");
                context.write().await.completed_nodes.push(node.id.clone());
                self.event_bus.emit(WorkflowEvent::NodeCompleted {
                    execution_id,
                    node_id: node.id.clone(),
                    output: output.clone(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                Ok(output)
            }
            Err(_) if control.cancellation.is_cancelled() => {
                tracing::debug!(%execution_id, node_id = %node.id, "Node aborted by cancellation");
                Err(FlowError::Cancelled { execution_id })
            }
            Err(e) => {
                tracing::error!(%execution_id, node_id = %node.id, error = %e, "Node failed");
                self.event_bus.emit(WorkflowEvent::NodeFailed {
                    execution_id,
                    node_id: node.id.clone(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                context.write().await.errors.push(NodeFailure {
                    node_id: node.id.clone(),
                    message: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(FlowError::Execution {
                    node_id: node.id.clone(),
                    source: e,
                })
            }
        }
    }

    /// Node-boundary checkpoint: records the pending queue, fails a cancelled
    /// run and parks a paused one until it is resumed or cancelled.
    async fn checkpoint(
        &self,
        context: &SharedExecutionContext,
        control: &ExecutionControl,
        queue: &VecDeque<NodeId>,
        execution_id: ExecutionId,
    ) -> Result<(), FlowError> {
        loop {
            let state = {
                let mut ctx = context.write().await;
                ctx.pending_nodes = queue.iter().cloned().collect();
                ctx.state
            };
            match state {
                ExecutionState::Cancelled => return Err(FlowError::Cancelled { execution_id }),
                ExecutionState::Paused => {
                    tracing::debug!(%execution_id, pending = queue.len(), "Execution parked at checkpoint");
                    tokio::select! {
                        _ = control.resumed.notified() => {}
                        _ = control.cancellation.cancelled() => {}
                    }
                }
                _ => return Ok(()),
            }
        }
    }
}

/// Resolve a node's declared inputs against earlier outputs and the context data
fn resolve_inputs(
    inputs: &HashMap<String, Value>,
    results: &HashMap<NodeId, Value>,
    data: &Value,
) -> HashMap<String, Value> {
    inputs
        .iter()
        .map(|(key, value)| (key.clone(), resolve_input(value, results, data)))
        .collect()
}

fn resolve_input(value: &Value, results: &HashMap<NodeId, Value>, data: &Value) -> Value {
    let Value::String(reference) = value else {
        return value.clone();
    };

    if let Some(node_ref) = reference.strip_prefix('$') {
        if let Some(output) = results.get(node_ref) {
            return output.clone();
        }
        // `$node.field.path` reaches into an earlier output
        return node_ref
            .split_once('.')
            .and_then(|(node_id, path)| results.get(node_id)?.get_path(path))
            .cloned()
            .unwrap_or(Value::Null);
    }

    if let Some(path) = reference.strip_prefix("context.") {
        return data.get_path(path).cloned().unwrap_or(Value::Null);
    }

    value.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_node_references_context_paths_and_literals() {
        let mut results = HashMap::new();
        results.insert("n1".to_string(), Value::from(json!({ "score": 7 })));
        let data = Value::from(json!({ "user": { "id": "u-1" } }));

        let mut inputs = HashMap::new();
        inputs.insert("whole".to_string(), Value::from("$n1"));
        inputs.insert("field".to_string(), Value::from("$n1.score"));
        inputs.insert("user".to_string(), Value::from("context.user.id"));
        inputs.insert("missing".to_string(), Value::from("$ghost"));
        inputs.insert("literal".to_string(), Value::from(42.0));

        let resolved = resolve_inputs(&inputs, &results, &data);
        assert_eq!(resolved["whole"], Value::from(json!({ "score": 7 })));
        assert_eq!(resolved["field"], Value::from(7.0));
        assert_eq!(resolved["user"], Value::from("u-1"));
        assert_eq!(resolved["missing"], Value::Null);
        assert_eq!(resolved["literal"], Value::from(42.0));
    }
}
