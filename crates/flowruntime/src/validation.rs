//! Structural and semantic checks run before a workflow is accepted.

use crate::registry::NodeRegistry;
use flowcore::{ValidationIssue, Workflow, WorkflowError};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{depth_first_search, Control, DfsEvent};
use std::collections::HashMap;

/// Validate `workflow` against `registry`, collecting every issue found
pub fn validate_workflow(workflow: &Workflow, registry: &NodeRegistry) -> Result<(), WorkflowError> {
    let mut issues = Vec::new();

    if workflow.id.trim().is_empty() {
        issues.push(ValidationIssue::MissingId);
    }
    if workflow.name.trim().is_empty() {
        issues.push(ValidationIssue::MissingName);
    }
    if workflow.nodes.is_empty() {
        issues.push(ValidationIssue::NoNodes);
    }

    match workflow.start_nodes().count() {
        0 if !workflow.nodes.is_empty() => issues.push(ValidationIssue::NoStartNode),
        n if n > 1 => issues.push(ValidationIssue::MultipleStartNodes(n)),
        _ => {}
    }

    let (graph, index) = build_graph(workflow);

    for edge in &workflow.edges {
        for endpoint in [&edge.source_node_id, &edge.target_node_id] {
            if !index.contains_key(endpoint.as_str()) {
                issues.push(ValidationIssue::DanglingEdge(endpoint.clone()));
            }
        }
        if let Some(condition) = &edge.condition {
            if let Err(e) = condition.parse() {
                issues.push(ValidationIssue::InvalidCondition {
                    source_node_id: edge.source_node_id.clone(),
                    target_node_id: edge.target_node_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    for node in &workflow.nodes {
        if !registry.has_node(&node.node_type) {
            issues.push(ValidationIssue::UnknownNodeType(node.node_type.clone()));
        }
    }

    if has_cycle(&graph) {
        issues.push(ValidationIssue::Cycle);
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(WorkflowError::Validation(issues))
    }
}

/// Nodes as vertices, edges between known nodes as arcs
fn build_graph(workflow: &Workflow) -> (DiGraph<&str, ()>, HashMap<&str, NodeIndex>) {
    let mut graph = DiGraph::new();
    let mut index = HashMap::new();

    for node in &workflow.nodes {
        index
            .entry(node.id.as_str())
            .or_insert_with(|| graph.add_node(node.id.as_str()));
    }
    for edge in &workflow.edges {
        let endpoints = (
            index.get(edge.source_node_id.as_str()),
            index.get(edge.target_node_id.as_str()),
        );
        if let (Some(&from), Some(&to)) = endpoints {
            graph.add_edge(from, to, ());
        }
    }

    (graph, index)
}

/// Depth-first search; an edge into a node still on the recursion stack is a cycle
fn has_cycle(graph: &DiGraph<&str, ()>) -> bool {
    let result = depth_first_search(graph, graph.node_indices(), |event| match event {
        DfsEvent::BackEdge(_, _) => Control::Break(()),
        _ => Control::Continue,
    });
    matches!(result, Control::Break(()))
}
