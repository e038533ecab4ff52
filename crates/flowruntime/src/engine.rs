use crate::config::RuntimeConfig;
use crate::executor::{ExecutionControl, WorkflowExecutor};
use crate::registry::NodeRegistry;
use crate::validation::validate_workflow;
use chrono::Utc;
use flowcore::{
    EventBus, ExecutionContext, ExecutionId, ExecutionOptions, ExecutionResult, ExecutionState,
    FlowError, SharedExecutionContext, Value, Workflow, WorkflowEvent,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;

struct ActiveExecution {
    context: SharedExecutionContext,
    control: Arc<ExecutionControl>,
}

type ActiveExecutions = Arc<Mutex<HashMap<ExecutionId, ActiveExecution>>>;

fn lock(active: &Mutex<HashMap<ExecutionId, ActiveExecution>>) -> MutexGuard<'_, HashMap<ExecutionId, ActiveExecution>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes an execution from the active index on every exit path,
/// including the caller dropping the execution future.
struct ActiveGuard {
    active: ActiveExecutions,
    execution_id: ExecutionId,
    control: Arc<ExecutionControl>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = lock(&self.active);
        // A cancelled run's id may already belong to a newer execution
        let owned = active
            .get(&self.execution_id)
            .is_some_and(|entry| Arc::ptr_eq(&entry.control, &self.control));
        if owned {
            active.remove(&self.execution_id);
        }
    }
}

/// Validates, stores and executes workflows
pub struct WorkflowEngine {
    registry: Arc<RwLock<NodeRegistry>>,
    executor: WorkflowExecutor,
    event_bus: Arc<EventBus>,
    workflows: RwLock<HashMap<String, Arc<Workflow>>>,
    active: ActiveExecutions,
}

impl WorkflowEngine {
    /// Create an engine with an empty registry and default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(NodeRegistry::new(), config)
    }

    /// Create an engine over a pre-populated registry
    pub fn with_registry(registry: NodeRegistry, config: RuntimeConfig) -> Self {
        Self::with_shared_registry(Arc::new(RwLock::new(registry)), config)
    }

    /// Create an engine over a registry shared with other components
    pub fn with_shared_registry(registry: Arc<RwLock<NodeRegistry>>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let executor = WorkflowExecutor::new(registry.clone(), event_bus.clone());

        Self {
            registry,
            executor,
            event_bus,
            workflows: RwLock::new(HashMap::new()),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Access to the node registry, e.g. for registering node types
    pub fn registry(&self) -> &Arc<RwLock<NodeRegistry>> {
        &self.registry
    }

    /// Validate and store a workflow, replacing any workflow with the same id
    pub async fn register_workflow(&self, workflow: Workflow) -> Result<(), FlowError> {
        {
            let registry = self.registry.read().await;
            validate_workflow(&workflow, &registry)?;
        }

        let workflow_id = workflow.id.clone();
        let name = workflow.name.clone();
        self.workflows
            .write()
            .await
            .insert(workflow_id.clone(), Arc::new(workflow));

        tracing::info!(%workflow_id, %name, "Registered workflow");
        self.event_bus.emit(WorkflowEvent::WorkflowRegistered {
            workflow_id,
            name,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn unregister_workflow(&self, workflow_id: &str) -> Option<Arc<Workflow>> {
        self.workflows.write().await.remove(workflow_id)
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Option<Arc<Workflow>> {
        self.workflows.read().await.get(workflow_id).cloned()
    }

    /// All registered workflows, sorted by id
    pub async fn get_all_workflows(&self) -> Vec<Arc<Workflow>> {
        let mut workflows: Vec<_> = self.workflows.read().await.values().cloned().collect();
        workflows.sort_by(|a, b| a.id.cmp(&b.id));
        workflows
    }

    /// Execute a registered workflow by id
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        initial_data: Option<Value>,
        options: ExecutionOptions,
    ) -> Result<ExecutionResult, FlowError> {
        let workflow = self
            .get_workflow(workflow_id)
            .await
            .ok_or_else(|| FlowError::WorkflowNotFound(workflow_id.to_string()))?;

        let mut context =
            ExecutionContext::new(workflow_id, initial_data.unwrap_or_else(Value::empty_object));
        context.user = options.user;
        if let Some(execution_id) = options.execution_id {
            context.execution_id = execution_id;
        }
        let execution_id = context.execution_id;

        let context = Arc::new(RwLock::new(context));
        let control = Arc::new(ExecutionControl::default());
        {
            let mut active = lock(&self.active);
            if active.contains_key(&execution_id) {
                return Err(FlowError::ExecutionAlreadyActive(execution_id));
            }
            active.insert(
                execution_id,
                ActiveExecution {
                    context: context.clone(),
                    control: control.clone(),
                },
            );
        }
        let _guard = ActiveGuard {
            active: self.active.clone(),
            execution_id,
            control: control.clone(),
        };

        tracing::info!(%execution_id, %workflow_id, "Starting workflow execution");
        self.event_bus.emit(WorkflowEvent::WorkflowStarted {
            execution_id,
            workflow_id: workflow_id.to_string(),
            timestamp: Utc::now(),
        });

        self.executor.execute(&workflow, &context, &control).await
    }

    fn lookup(&self, execution_id: ExecutionId) -> Result<(SharedExecutionContext, Arc<ExecutionControl>), FlowError> {
        lock(&self.active)
            .get(&execution_id)
            .map(|active| (active.context.clone(), active.control.clone()))
            .ok_or(FlowError::ExecutionNotFound(execution_id))
    }

    /// Park a running execution at its next node boundary
    pub async fn pause_execution(&self, execution_id: ExecutionId) -> Result<(), FlowError> {
        let (context, _) = self.lookup(execution_id)?;
        transition(&context, execution_id, "paused", ExecutionState::Running, ExecutionState::Paused).await?;

        tracing::info!(%execution_id, "Execution paused");
        self.event_bus.emit(WorkflowEvent::WorkflowPaused {
            execution_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn resume_execution(&self, execution_id: ExecutionId) -> Result<(), FlowError> {
        let (context, control) = self.lookup(execution_id)?;
        transition(&context, execution_id, "resumed", ExecutionState::Paused, ExecutionState::Running).await?;
        control.resumed.notify_one();

        tracing::info!(%execution_id, "Execution resumed");
        self.event_bus.emit(WorkflowEvent::WorkflowResumed {
            execution_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Cancel an execution. The run stops at its next node boundary and its
    /// `execute_workflow` call returns [`FlowError::Cancelled`].
    pub async fn cancel_execution(&self, execution_id: ExecutionId) -> Result<(), FlowError> {
        let (context, control) = self.lookup(execution_id)?;
        {
            let mut ctx = context.write().await;
            if ctx.state.is_terminal() {
                return Err(FlowError::InvalidState {
                    execution_id,
                    action: "cancelled",
                    state: ctx.state.to_string(),
                });
            }
            ctx.finish(ExecutionState::Cancelled);
        }
        lock(&self.active).remove(&execution_id);
        control.cancellation.cancel();

        tracing::info!(%execution_id, "Execution cancelled");
        self.event_bus.emit(WorkflowEvent::WorkflowCancelled {
            execution_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Snapshots of every execution between start and terminal state
    pub async fn get_active_executions(&self) -> Vec<ExecutionContext> {
        let contexts: Vec<SharedExecutionContext> = lock(&self.active)
            .values()
            .map(|active| active.context.clone())
            .collect();

        let mut snapshots = Vec::with_capacity(contexts.len());
        for context in contexts {
            snapshots.push(context.read().await.clone());
        }
        snapshots
    }

    pub fn active_execution_ids(&self) -> Vec<ExecutionId> {
        lock(&self.active).keys().copied().collect()
    }

    pub async fn get_execution_context(&self, execution_id: ExecutionId) -> Option<ExecutionContext> {
        let (context, _) = self.lookup(execution_id).ok()?;
        let snapshot = context.read().await.clone();
        Some(snapshot)
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

async fn transition(
    context: &SharedExecutionContext,
    execution_id: ExecutionId,
    action: &'static str,
    from: ExecutionState,
    to: ExecutionState,
) -> Result<(), FlowError> {
    let mut ctx = context.write().await;
    if ctx.state != from {
        return Err(FlowError::InvalidState {
            execution_id,
            action,
            state: ctx.state.to_string(),
        });
    }
    ctx.state = to;
    Ok(())
}
