use crate::param;
use async_trait::async_trait;
use flowcore::{
    NodeCategory, NodeConfig, NodeContext, NodeError, NodeExecutor, PortDefinition, Value,
};
use flowruntime::NodeDefinition;
use std::collections::HashMap;
use std::sync::Arc;

const METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

/// HTTP request node
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

fn with_body(request: reqwest::RequestBuilder, body: Option<&Value>) -> reqwest::RequestBuilder {
    match body {
        Some(Value::String(text)) => request.body(text.clone()),
        Some(Value::Null) | None => request,
        Some(value) => request.json(value),
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestNode {
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let url_value = param(&ctx, "url").ok_or_else(|| NodeError::MissingInput("url".to_string()))?;
        let url = url_value.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: "url".to_string(),
            expected: "string".to_string(),
            actual: url_value.type_name().to_string(),
        })?;
        let method = param(&ctx, "method")
            .and_then(|v| v.as_str())
            .unwrap_or("GET")
            .to_uppercase();

        tracing::info!(node_id = %ctx.node_id, %method, %url, "HTTP request");

        let body = ctx.inputs.get("body");
        let request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => with_body(self.client.post(url), body),
            "PUT" => with_body(self.client.put(url), body),
            "PATCH" => with_body(self.client.patch(url), body),
            "DELETE" => self.client.delete(url),
            _ => return Err(NodeError::Configuration(format!("Unsupported method: {}", method))),
        };

        // Add headers if provided
        let request = match ctx.config.get("headers") {
            Some(Value::Object(headers)) => headers.iter().fold(request, |req, (key, value)| {
                match value.as_str() {
                    Some(v) => req.header(key, v),
                    None => req,
                }
            }),
            _ => request,
        };

        let response = tokio::select! {
            response = request.send() => response
                .map_err(|e| NodeError::failed(format!("HTTP request failed: {}", e)))?,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        };

        let status = response.status().as_u16();
        let headers: HashMap<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(v.to_str().unwrap_or(""))))
            .collect();

        let body_text = response
            .text()
            .await
            .map_err(|e| NodeError::failed(format!("Failed to read response: {}", e)))?;

        tracing::info!(node_id = %ctx.node_id, status, "Response received");

        // JSON bodies are exposed structured as well as raw
        let json = serde_json::from_str::<serde_json::Value>(&body_text)
            .map(Value::from)
            .unwrap_or(Value::Null);

        Ok(Value::Object(HashMap::from([
            ("status".to_string(), Value::from(f64::from(status))),
            ("ok".to_string(), Value::from((200..300).contains(&status))),
            ("body".to_string(), Value::from(body_text)),
            ("json".to_string(), json),
            ("headers".to_string(), Value::Object(headers)),
        ])))
    }

    fn validate(&self, config: &NodeConfig) -> Option<bool> {
        Some(valid_method(config))
    }
}

fn valid_method(config: &NodeConfig) -> bool {
    match config.get("method") {
        None => true,
        Some(method) => method
            .as_str()
            .is_some_and(|m| METHODS.contains(&m.to_uppercase().as_str())),
    }
}

pub(crate) fn definition() -> NodeDefinition {
    NodeDefinition::new("http.request", NodeCategory::Integration, Arc::new(HttpRequestNode::new()))
        .with_label("HTTP Request")
        .with_description("Make HTTP requests")
        .with_input(PortDefinition::required("url", "string"))
        .with_input(PortDefinition::optional("body", "any"))
        .with_output(PortDefinition::required("status", "number"))
        .with_output(PortDefinition::required("body", "string"))
        .with_output(PortDefinition::optional("json", "any"))
        .with_output(PortDefinition::required("headers", "object"))
}
