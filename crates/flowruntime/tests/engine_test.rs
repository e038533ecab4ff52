// crates/flowruntime/tests/engine_test.rs

mod common;

use common::{
    definition, echo_workflow, init_tracing, test_registry, CapturingFailNode, StubbornNode,
};
use flowcore::{
    ConditionError, ExecutionOptions, ExecutionState, FlowError, Value, Workflow, WorkflowEdge, WorkflowEvent,
    WorkflowNode,
};
use flowruntime::{RuntimeConfig, WorkflowEngine};
use uuid::Uuid;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn engine() -> WorkflowEngine {
    init_tracing();
    WorkflowEngine::with_registry(test_registry(), RuntimeConfig::default())
}

fn drain(rx: &mut broadcast::Receiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Poll until the engine reports an active execution
async fn wait_for_active(engine: &WorkflowEngine) -> Uuid {
    for _ in 0..100 {
        if let Some(id) = engine.active_execution_ids().first() {
            return *id;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("execution never became active");
}

#[tokio::test]
async fn test_single_node_workflow_succeeds() {
    let engine = engine();
    engine.register_workflow(echo_workflow("wf-a")).await.unwrap();

    let result = engine
        .execute_workflow("wf-a", Some(Value::from(json!({ "x": 1 }))), ExecutionOptions::default())
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.error.is_none());
    assert_eq!(result.node_outputs.len(), 1);
    assert!(engine.get_active_executions().await.is_empty());
}

#[tokio::test]
async fn test_cycle_is_rejected() {
    let engine = engine();
    let workflow = Workflow::new("wf-b", "Cyclic")
        .with_node(WorkflowNode::new("n1", "echo").start())
        .with_node(WorkflowNode::new("n2", "echo"))
        .with_edge(WorkflowEdge::new("n1", "n2"))
        .with_edge(WorkflowEdge::new("n2", "n1"));

    let err = engine.register_workflow(workflow).await.unwrap_err();
    assert!(err.to_string().contains("cycles"), "got: {err}");
    assert!(engine.get_workflow("wf-b").await.is_none());
}

#[tokio::test]
async fn test_dangling_edge_is_rejected() {
    let engine = engine();
    let workflow = echo_workflow("wf-c").with_edge(WorkflowEdge::new("n1", "ghost"));

    let err = engine.register_workflow(workflow).await.unwrap_err();
    assert!(err.to_string().contains("non-existent node"), "got: {err}");
    assert!(err.to_string().contains("ghost"));
}

#[tokio::test]
async fn test_failing_node_rejects_and_records_error() {
    let engine = engine();
    let failing = Arc::new(CapturingFailNode::default());
    engine
        .registry()
        .write()
        .await
        .register_node(definition("capture-fail", failing.clone()))
        .unwrap();

    let workflow = Workflow::new("wf-d", "Failing")
        .with_node(WorkflowNode::new("n1", "echo").start())
        .with_node(WorkflowNode::new("bad", "capture-fail"))
        .with_edge(WorkflowEdge::new("n1", "bad"));
    engine.register_workflow(workflow).await.unwrap();

    let mut events = engine.subscribe_events();
    let err = engine
        .execute_workflow("wf-d", None, ExecutionOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "boom");
    assert!(matches!(err, FlowError::Execution { ref node_id, .. } if node_id == "bad"));

    let context = failing.captured.lock().unwrap().clone().unwrap();
    let context = context.read().await;
    assert_eq!(context.errors.len(), 1);
    assert_eq!(context.errors[0].node_id, "bad");
    assert_eq!(context.errors[0].message, "boom");
    assert_eq!(context.state, ExecutionState::Failed);
    assert!(context.end_time.is_some());
    assert_eq!(context.completed_nodes, vec!["n1".to_string()]);

    let names: Vec<_> = drain(&mut events).iter().map(WorkflowEvent::name).collect();
    assert!(names.contains(&"node:failed"));
    assert_eq!(names.last(), Some(&"workflow:failed"));
    assert!(engine.active_execution_ids().is_empty());
}

#[tokio::test]
async fn test_validation_reports_each_problem() {
    let engine = engine();

    let err = engine
        .register_workflow(Workflow::new("", ""))
        .await
        .unwrap_err()
        .to_string();
    assert!(err.contains("must have an id"), "got: {err}");
    assert!(err.contains("must have a name"), "got: {err}");
    assert!(err.contains("at least one node"), "got: {err}");

    let no_start = Workflow::new("w", "No start").with_node(WorkflowNode::new("n1", "echo"));
    let err = engine.register_workflow(no_start).await.unwrap_err().to_string();
    assert!(err.contains("must have a start node"), "got: {err}");

    let two_starts = Workflow::new("w", "Two starts")
        .with_node(WorkflowNode::new("n1", "echo").start())
        .with_node(WorkflowNode::new("n2", "echo").start());
    let err = engine.register_workflow(two_starts).await.unwrap_err().to_string();
    assert!(err.contains("only have one start node"), "got: {err}");

    let unknown = Workflow::new("w", "Unknown").with_node(WorkflowNode::new("n1", "teleport").start());
    let err = engine.register_workflow(unknown).await.unwrap_err().to_string();
    assert!(err.contains("Unknown node type: teleport"), "got: {err}");

    let bad_condition = echo_workflow("w")
        .with_node(WorkflowNode::new("n2", "echo"))
        .with_edge(WorkflowEdge::new("n1", "n2").with_condition("score >"));
    let err = engine.register_workflow(bad_condition).await.unwrap_err().to_string();
    assert!(err.contains("Invalid edge condition"), "got: {err}");
}

#[tokio::test]
async fn test_unknown_workflow() {
    let engine = engine();
    let err = engine
        .execute_workflow("nope", None, ExecutionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::WorkflowNotFound(ref id) if id == "nope"));
}

#[tokio::test]
async fn test_each_run_gets_a_fresh_execution_id() {
    let engine = engine();
    engine.register_workflow(echo_workflow("wf")).await.unwrap();

    let first = engine.execute_workflow("wf", None, ExecutionOptions::default()).await.unwrap();
    let second = engine.execute_workflow("wf", None, ExecutionOptions::default()).await.unwrap();
    assert_ne!(first.execution_id, second.execution_id);
}

#[tokio::test]
async fn test_inputs_resolve_from_outputs_and_context() {
    let engine = engine();
    let workflow = Workflow::new("wf", "Threading")
        .with_node(WorkflowNode::new("n1", "echo").start().with_config("greeting", "hi"))
        .with_node(
            WorkflowNode::new("n2", "echo")
                .with_input("prev", "$n1")
                .with_input("greeting", "$n1.greeting")
                .with_input("user", "context.user.name")
                .with_input("missing", "$ghost")
                .with_input("literal", "plain text"),
        )
        .with_edge(WorkflowEdge::new("n1", "n2"));
    engine.register_workflow(workflow).await.unwrap();

    let result = engine
        .execute_workflow(
            "wf",
            Some(Value::from(json!({ "user": { "name": "ada" } }))),
            ExecutionOptions::for_user("ada"),
        )
        .await
        .unwrap();

    let n2 = &result.node_outputs["n2"];
    assert_eq!(n2.get("prev"), Some(&Value::from(json!({ "greeting": "hi" }))));
    assert_eq!(n2.get("greeting"), Some(&Value::from("hi")));
    assert_eq!(n2.get("user"), Some(&Value::from("ada")));
    assert_eq!(n2.get("missing"), Some(&Value::Null));
    assert_eq!(n2.get("literal"), Some(&Value::from("plain text")));

    // The run's data is the first visited node's output
    assert_eq!(result.data, result.node_outputs["n1"]);
}

#[tokio::test]
async fn test_conditional_edges() {
    let engine = engine();
    let workflow = Workflow::new("wf", "Branching")
        .with_node(WorkflowNode::new("check", "echo").start().with_config("score", 7.0))
        .with_node(WorkflowNode::new("high", "echo"))
        .with_node(WorkflowNode::new("low", "echo"))
        .with_edge(WorkflowEdge::new("check", "high").with_condition("output.score > 5"))
        .with_edge(WorkflowEdge::new("check", "low").with_condition("score <= 5"));
    engine.register_workflow(workflow).await.unwrap();

    let result = engine.execute_workflow("wf", None, ExecutionOptions::default()).await.unwrap();
    assert!(result.node_outputs.contains_key("high"));
    assert!(!result.node_outputs.contains_key("low"));
}

#[tokio::test]
async fn test_diamond_join_runs_once() {
    let engine = engine();
    let workflow = Workflow::new("wf", "Diamond")
        .with_node(WorkflowNode::new("a", "echo").start())
        .with_node(WorkflowNode::new("b", "echo"))
        .with_node(WorkflowNode::new("c", "echo"))
        .with_node(WorkflowNode::new("d", "echo"))
        .with_edge(WorkflowEdge::new("a", "b"))
        .with_edge(WorkflowEdge::new("a", "c"))
        .with_edge(WorkflowEdge::new("b", "d"))
        .with_edge(WorkflowEdge::new("c", "d"));
    engine.register_workflow(workflow).await.unwrap();

    let mut events = engine.subscribe_events();
    let result = engine.execute_workflow("wf", None, ExecutionOptions::default()).await.unwrap();
    assert_eq!(result.node_outputs.len(), 4);

    let d_runs = drain(&mut events)
        .iter()
        .filter(|e| matches!(e, WorkflowEvent::NodeExecuting { node_id, .. } if node_id == "d"))
        .count();
    assert_eq!(d_runs, 1);
}

#[tokio::test]
async fn test_event_sequence() {
    let engine = engine();
    let mut events = engine.subscribe_events();
    engine.register_workflow(echo_workflow("wf")).await.unwrap();
    let result = engine.execute_workflow("wf", None, ExecutionOptions::default()).await.unwrap();

    let events = drain(&mut events);
    let names: Vec<_> = events.iter().map(WorkflowEvent::name).collect();
    assert_eq!(
        names,
        vec![
            "workflow:registered",
            "workflow:started",
            "node:executing",
            "node:completed",
            "workflow:completed",
        ]
    );
    assert!(events[1..]
        .iter()
        .all(|e| e.execution_id() == Some(result.execution_id)));
}

#[tokio::test]
async fn test_cancel_rejects_run_and_clears_active() {
    let engine = Arc::new(engine());
    let workflow = Workflow::new("wf", "Slow")
        .with_node(WorkflowNode::new("slow", "slow").start())
        .with_node(WorkflowNode::new("after", "echo"))
        .with_edge(WorkflowEdge::new("slow", "after"));
    engine.register_workflow(workflow).await.unwrap();

    let runner = engine.clone();
    let handle = tokio::spawn(async move {
        runner.execute_workflow("wf", None, ExecutionOptions::default()).await
    });

    let execution_id = wait_for_active(&engine).await;
    engine.cancel_execution(execution_id).await.unwrap();
    assert!(engine.get_execution_context(execution_id).await.is_none());

    let err = handle.await.unwrap().unwrap_err();
    assert!(err.is_cancelled(), "got: {err}");
    assert!(engine.get_active_executions().await.is_empty());

    // Already gone
    assert!(matches!(
        engine.cancel_execution(execution_id).await,
        Err(FlowError::ExecutionNotFound(_))
    ));
}

#[tokio::test]
async fn test_pause_parks_at_checkpoint_until_resumed() {
    let engine = Arc::new(engine());
    let workflow = Workflow::new("wf", "Pausable")
        .with_node(WorkflowNode::new("slow", "slow").start())
        .with_node(WorkflowNode::new("after", "echo"))
        .with_edge(WorkflowEdge::new("slow", "after"));
    engine.register_workflow(workflow).await.unwrap();

    let runner = engine.clone();
    let handle = tokio::spawn(async move {
        runner.execute_workflow("wf", None, ExecutionOptions::default()).await
    });

    let execution_id = wait_for_active(&engine).await;
    engine.pause_execution(execution_id).await.unwrap();
    assert!(matches!(
        engine.pause_execution(execution_id).await,
        Err(FlowError::InvalidState { .. })
    ));

    // Let the in-flight node finish; the run must then wait at the checkpoint
    tokio::time::sleep(Duration::from_millis(400)).await;
    let parked = engine.get_execution_context(execution_id).await.unwrap();
    assert_eq!(parked.state, ExecutionState::Paused);
    assert_eq!(parked.completed_nodes, vec!["slow".to_string()]);
    assert_eq!(parked.pending_nodes, vec!["after".to_string()]);
    assert!(!handle.is_finished());

    engine.resume_execution(execution_id).await.unwrap();
    let result = handle.await.unwrap().unwrap();
    assert!(result.success);
    assert!(result.node_outputs.contains_key("after"));

    assert!(matches!(
        engine.resume_execution(execution_id).await,
        Err(FlowError::ExecutionNotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_while_paused() {
    let engine = Arc::new(engine());
    let workflow = Workflow::new("wf", "Pausable")
        .with_node(WorkflowNode::new("slow", "slow").start())
        .with_node(WorkflowNode::new("after", "echo"))
        .with_edge(WorkflowEdge::new("slow", "after"));
    engine.register_workflow(workflow).await.unwrap();

    let runner = engine.clone();
    let handle = tokio::spawn(async move {
        runner.execute_workflow("wf", None, ExecutionOptions::default()).await
    });

    let execution_id = wait_for_active(&engine).await;
    engine.pause_execution(execution_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    engine.cancel_execution(execution_id).await.unwrap();

    let err = handle.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_workflow_catalog() {
    let engine = engine();
    engine.register_workflow(echo_workflow("b")).await.unwrap();
    engine.register_workflow(echo_workflow("a")).await.unwrap();

    let ids: Vec<_> = engine
        .get_all_workflows()
        .await
        .iter()
        .map(|w| w.id.clone())
        .collect();
    assert_eq!(ids, vec!["a", "b"]);

    assert!(engine.unregister_workflow("a").await.is_some());
    assert!(engine.get_workflow("a").await.is_none());
}

#[tokio::test]
async fn test_cancel_stops_at_next_node_when_executor_ignores_token() {
    let engine = Arc::new(engine());
    engine
        .registry()
        .write()
        .await
        .register_node(definition(
            "stubborn",
            Arc::new(StubbornNode(Duration::from_millis(200))),
        ))
        .unwrap();
    let workflow = Workflow::new("wf", "Stubborn")
        .with_node(WorkflowNode::new("stubborn", "stubborn").start())
        .with_node(WorkflowNode::new("after", "echo"))
        .with_edge(WorkflowEdge::new("stubborn", "after"));
    engine.register_workflow(workflow).await.unwrap();

    let mut events = engine.subscribe_events();
    let runner = engine.clone();
    let handle = tokio::spawn(async move {
        runner.execute_workflow("wf", None, ExecutionOptions::default()).await
    });

    let execution_id = wait_for_active(&engine).await;
    engine.cancel_execution(execution_id).await.unwrap();

    let err = handle.await.unwrap().unwrap_err();
    assert!(err.is_cancelled(), "got: {err}");
    assert!(engine.get_active_executions().await.is_empty());

    let events = drain(&mut events);
    assert!(!events.iter().any(|e| matches!(
        e,
        WorkflowEvent::NodeExecuting { node_id, .. } if node_id == "after"
    )));
    // The in-flight node finished normally; only the queue was abandoned
    assert!(events.iter().any(|e| matches!(
        e,
        WorkflowEvent::NodeCompleted { node_id, .. } if node_id == "stubborn"
    )));
    let names: Vec<_> = events.iter().map(WorkflowEvent::name).collect();
    assert!(!names.contains(&"workflow:completed"));
    assert_eq!(names.iter().filter(|n| **n == "workflow:cancelled").count(), 1);
}

#[tokio::test]
async fn test_duplicate_active_execution_id_is_rejected() {
    let engine = Arc::new(engine());
    engine.register_workflow(echo_workflow("fast")).await.unwrap();
    let slow = Workflow::new("slow", "Slow").with_node(WorkflowNode::new("n1", "slow").start());
    engine.register_workflow(slow).await.unwrap();

    let execution_id = Uuid::new_v4();
    let options = ExecutionOptions {
        execution_id: Some(execution_id),
        ..ExecutionOptions::default()
    };

    let runner = engine.clone();
    let slow_options = options.clone();
    let handle = tokio::spawn(async move {
        runner.execute_workflow("slow", None, slow_options).await
    });
    assert_eq!(wait_for_active(&engine).await, execution_id);

    let err = engine
        .execute_workflow("fast", None, options)
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::ExecutionAlreadyActive(id) if id == execution_id));

    // The slow run is still tracked and still cancellable
    assert_eq!(engine.active_execution_ids(), vec![execution_id]);
    engine.cancel_execution(execution_id).await.unwrap();
    assert!(handle.await.unwrap().unwrap_err().is_cancelled());
    assert!(engine.active_execution_ids().is_empty());
}

#[tokio::test]
async fn test_deeply_nested_condition_is_a_validation_error() {
    let engine = engine();
    let workflow = echo_workflow("deep")
        .with_node(WorkflowNode::new("n2", "echo"))
        .with_edge(WorkflowEdge::new("n1", "n2").with_condition(format!("{}a", "!".repeat(200_000))));

    let err = engine.register_workflow(workflow).await.unwrap_err().to_string();
    assert!(err.contains("Invalid edge condition"), "got: {err}");
    assert!(err.contains(&ConditionError::TooDeep(flowcore::MAX_CONDITION_DEPTH).to_string()), "got: {err}");
    assert!(engine.get_workflow("deep").await.is_none());
}
