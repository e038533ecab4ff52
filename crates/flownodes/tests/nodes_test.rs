// crates/flownodes/tests/nodes_test.rs

use flowcore::{
    ExecutionContext, ExecutionOptions, NodeCategory, NodeConfig, NodeContext, NodeError,
    NodeExecutor, Value, Workflow, WorkflowEdge, WorkflowNode,
};
use flownodes::{
    ConditionNode, DelayNode, EchoNode, HttpRequestNode, JsonParseNode, JsonStringifyNode,
};
use flowruntime::{NodeRegistry, RuntimeConfig, WorkflowEngine};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

// Helper function to create a test context
fn create_test_context(
    config: HashMap<String, Value>,
    inputs: HashMap<String, Value>,
) -> NodeContext {
    init_tracing();
    let execution = ExecutionContext::new("test-workflow", Value::empty_object());
    NodeContext {
        execution_id: execution.execution_id,
        node_id: "node".to_string(),
        inputs,
        config,
        execution: Arc::new(RwLock::new(execution)),
        cancellation: CancellationToken::new(),
    }
}

fn map(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn test_register_all() {
    let mut registry = NodeRegistry::new();
    let count = flownodes::register_all(&mut registry).unwrap();
    assert_eq!(count, registry.len());

    for node_type in [
        "echo",
        "debug.log",
        "time.delay",
        "transform.json_parse",
        "transform.json_stringify",
        "http.request",
        "logic.condition",
    ] {
        assert!(registry.has_node(node_type), "missing {node_type}");
    }

    let stats = registry.get_statistics();
    assert_eq!(stats.nodes_by_category[&NodeCategory::Transform], 2);
    assert_eq!(stats.nodes_with_validator, 3);

    // Registering twice fails for every type
    let err = flownodes::register_all(&mut registry).unwrap_err();
    assert_eq!(err.registered, 0);
    assert_eq!(err.failures.len(), count);
}

#[test]
fn test_config_validators() {
    let mut registry = NodeRegistry::new();
    flownodes::register_all(&mut registry).unwrap();

    let bad_method: NodeConfig = map(&[("method", Value::from("TELEPORT"))]);
    assert!(!registry.validate_node_config("http.request", &bad_method).unwrap());
    let post: NodeConfig = map(&[("method", Value::from("post"))]);
    assert!(registry.validate_node_config("http.request", &post).unwrap());

    let negative: NodeConfig = map(&[("delay_ms", Value::from(-5.0))]);
    assert!(!registry.validate_node_config("time.delay", &negative).unwrap());

    let expression: NodeConfig = map(&[("expression", Value::from("count >= 3"))]);
    assert!(registry.validate_node_config("logic.condition", &expression).unwrap());
    let broken: NodeConfig = map(&[("expression", Value::from("count >="))]);
    assert!(!registry.validate_node_config("logic.condition", &broken).unwrap());
}

#[tokio::test]
async fn test_echo_merges_config_and_inputs() {
    let ctx = create_test_context(
        map(&[("a", Value::from(1.0)), ("b", Value::from("config"))]),
        map(&[("b", Value::from("input"))]),
    );
    let output = EchoNode.execute(ctx).await.unwrap();
    assert_eq!(output.get("a"), Some(&Value::from(1.0)));
    assert_eq!(output.get("b"), Some(&Value::from("input")));
}

#[tokio::test]
async fn test_json_parse_and_stringify() {
    let ctx = create_test_context(
        HashMap::new(),
        map(&[("json", Value::from(r#"{"items": [1, 2], "ok": true}"#))]),
    );
    let output = JsonParseNode.execute(ctx).await.unwrap();
    assert_eq!(output.get_path("parsed.items.1"), Some(&Value::from(2.0)));
    assert_eq!(output.get_path("parsed.ok"), Some(&Value::from(true)));

    let ctx = create_test_context(
        map(&[("pretty", Value::from(false))]),
        map(&[("value", Value::from(vec![Value::from("x")]))]),
    );
    let output = JsonStringifyNode.execute(ctx).await.unwrap();
    assert_eq!(output.get("json"), Some(&Value::from(r#"["x"]"#)));
}

#[tokio::test]
async fn test_json_parse_errors() {
    let ctx = create_test_context(HashMap::new(), HashMap::new());
    let err = JsonParseNode.execute(ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::MissingInput(ref f) if f == "json"));

    let ctx = create_test_context(HashMap::new(), map(&[("json", Value::from(3.0))]));
    let err = JsonParseNode.execute(ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::InvalidInputType { .. }));

    let ctx = create_test_context(HashMap::new(), map(&[("json", Value::from("{ nope"))]));
    let err = JsonParseNode.execute(ctx).await.unwrap_err();
    assert!(err.to_string().starts_with("JSON parse error"), "got: {err}");
}

#[tokio::test]
async fn test_delay_passes_inputs_through() {
    let ctx = create_test_context(
        map(&[("delay_ms", Value::from(10.0))]),
        map(&[("carry", Value::from("me"))]),
    );
    let output = DelayNode.execute(ctx).await.unwrap();
    assert_eq!(output.get("carry"), Some(&Value::from("me")));
}

#[tokio::test]
async fn test_delay_stops_on_cancellation() {
    let ctx = create_test_context(map(&[("delay_ms", Value::from(60_000.0))]), HashMap::new());
    let token = ctx.cancellation.clone();

    let handle = tokio::spawn(async move { DelayNode.execute(ctx).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("delay should stop promptly")
        .unwrap();
    assert!(matches!(result, Err(NodeError::Cancelled)));
}

#[tokio::test]
async fn test_condition_node() {
    let ctx = create_test_context(
        map(&[("expression", Value::from("count >= 3 && name == 'ada'"))]),
        map(&[("count", Value::from(4.0)), ("name", Value::from("ada"))]),
    );
    let output = ConditionNode.execute(ctx).await.unwrap();
    assert_eq!(output.get("result"), Some(&Value::from(true)));
    assert_eq!(output.get("count"), Some(&Value::from(4.0)));

    let ctx = create_test_context(HashMap::new(), HashMap::new());
    let err = ConditionNode.execute(ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::Configuration(_)));
}

#[tokio::test]
async fn test_http_request_against_local_server() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let _ = socket.read(&mut buf).await.unwrap();
        let body = r#"{"hello":"world"}"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
    });

    let ctx = create_test_context(
        HashMap::new(),
        map(&[("url", Value::from(format!("http://{addr}/greeting")))]),
    );
    let output = HttpRequestNode::new().execute(ctx).await.unwrap();

    assert_eq!(output.get("status"), Some(&Value::from(200.0)));
    assert_eq!(output.get("ok"), Some(&Value::from(true)));
    assert_eq!(output.get_path("json.hello"), Some(&Value::from("world")));
    assert_eq!(
        output.get_path("headers.content-type"),
        Some(&Value::from("application/json"))
    );
}

#[tokio::test]
async fn test_http_request_rejects_unknown_method() {
    let ctx = create_test_context(
        map(&[("method", Value::from("BREW"))]),
        map(&[("url", Value::from("http://127.0.0.1:1/"))]),
    );
    let err = HttpRequestNode::new().execute(ctx).await.unwrap_err();
    assert!(err.to_string().contains("Unsupported method"), "got: {err}");
}

#[tokio::test]
async fn test_standard_nodes_in_a_workflow() {
    init_tracing();
    let mut registry = NodeRegistry::new();
    flownodes::register_all(&mut registry).unwrap();
    let engine = WorkflowEngine::with_registry(registry, RuntimeConfig::default());

    let workflow = Workflow::new("pipeline", "Parse and branch")
        .with_node(
            WorkflowNode::new("parse", "transform.json_parse")
                .start()
                .with_input("json", "context.payload"),
        )
        .with_node(
            WorkflowNode::new("check", "logic.condition")
                .with_config("expression", "total > 10")
                .with_input("total", "$parse.parsed.total"),
        )
        .with_node(WorkflowNode::new("big", "debug.log").with_input("message", "big order"))
        .with_node(WorkflowNode::new("small", "debug.log").with_input("message", "small order"))
        .with_edge(WorkflowEdge::new("parse", "check"))
        .with_edge(WorkflowEdge::new("check", "big").with_condition("result == true"))
        .with_edge(WorkflowEdge::new("check", "small").with_condition("!result"));
    engine.register_workflow(workflow).await.unwrap();

    let data = Value::Object(map(&[("payload", Value::from(r#"{"total": 42}"#))]));
    let result = engine
        .execute_workflow("pipeline", Some(data), ExecutionOptions::default())
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.node_outputs.contains_key("big"));
    assert!(!result.node_outputs.contains_key("small"));
    assert_eq!(
        result.node_outputs["big"].get("message"),
        Some(&Value::from("big order"))
    );
}
