// crates/flowcli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowcore::{
    ExecutionOptions, NodeCategory, TriggerSpec, Value, Workflow, WorkflowEvent, WorkflowNode,
};
use flowruntime::{
    loader, FileWorkflowRepository, FlowConfig, NodeRegistry, WorkflowEngine, WorkflowScheduler,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// User recorded on the execution
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes {
        /// Only show one category
        #[arg(long)]
        category: Option<NodeCategory>,
    },

    /// Search node types by type, label, description or category
    Search { query: String },

    /// Run the cron scheduler over a directory of workflows until Ctrl-C
    Schedule {
        /// Directory of `<id>.json` workflow files
        #[arg(short, long, default_value = "workflows")]
        dir: PathBuf,
    },

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,

        /// Attach a cron trigger
        #[arg(long)]
        cron: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<FlowConfig> {
    let Some(path) = path else {
        return Ok(FlowConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
}

/// Parse `--input` as a JSON object
fn parse_input(input: Option<&str>) -> Result<Option<Value>> {
    let Some(input) = input else {
        return Ok(None);
    };
    let json: serde_json::Value = serde_json::from_str(input).context("Input is not valid JSON")?;
    if !json.is_object() {
        anyhow::bail!("Input must be a JSON object");
    }
    Ok(Some(Value::from(json)))
}

fn standard_registry() -> Result<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    flownodes::register_all(&mut registry)?;
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { file, input, user } => {
            run_workflow(&config, &file, input.as_deref(), user).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(&file).await?;
        }

        Commands::Nodes { category } => {
            list_nodes(category)?;
        }

        Commands::Search { query } => {
            search_nodes(&query)?;
        }

        Commands::Schedule { dir } => {
            run_scheduler(config, dir).await?;
        }

        Commands::Init { output, cron } => {
            create_example_workflow(&output, cron).await?;
        }
    }

    Ok(())
}

fn print_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::WorkflowStarted { workflow_id, .. } => {
            println!("▶️  Workflow {} started", workflow_id);
        }
        WorkflowEvent::NodeExecuting { node_id, node_type, .. } => {
            println!("  ⚡ Starting node: {} ({})", node_id, node_type);
        }
        WorkflowEvent::NodeCompleted { node_id, duration_ms, .. } => {
            println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
        }
        WorkflowEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {} failed: {}", node_id, error);
        }
        WorkflowEvent::WorkflowCompleted { duration_ms, .. } => {
            println!("✨ Workflow completed successfully in {}ms", duration_ms);
        }
        WorkflowEvent::WorkflowFailed { error, .. } => {
            println!("💥 Workflow failed: {}", error);
        }
        WorkflowEvent::WorkflowScheduled { workflow_id, cron_expression, next_run, .. } => {
            let next = next_run.map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
            println!("🕒 Scheduled {} ({}), next run {}", workflow_id, cron_expression, next);
        }
        WorkflowEvent::WorkflowUnscheduled { workflow_id, .. } => {
            println!("🗑️  Unscheduled {}", workflow_id);
        }
        WorkflowEvent::WorkflowExecuted { workflow_id, duration_ms, .. } => {
            println!("✨ Scheduled run of {} completed in {}ms", workflow_id, duration_ms);
        }
        WorkflowEvent::WorkflowExecutionFailed { workflow_id, error, .. } => {
            println!("💥 Scheduled run of {} failed: {}", workflow_id, error);
        }
        _ => {}
    }
}

fn spawn_printer(mut events: broadcast::Receiver<WorkflowEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn run_workflow(
    config: &FlowConfig,
    file: &Path,
    input: Option<&str>,
    user: Option<String>,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow = loader::load_workflow_file(file).await?;
    let workflow_id = workflow.id.clone();
    let total_nodes = workflow.nodes.len();

    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!();

    let data = parse_input(input)?;

    let engine = WorkflowEngine::with_registry(standard_registry()?, config.runtime.clone());
    engine.register_workflow(workflow).await?;

    // Subscribe to events for real-time output
    let event_task = spawn_printer(engine.subscribe_events());

    let options = ExecutionOptions {
        user,
        ..ExecutionOptions::default()
    };
    let outcome = engine.execute_workflow(&workflow_id, data, options).await;

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    let result = outcome?;
    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!("   Duration: {}ms", result.duration);
    println!("   Completed: {}/{} nodes", result.node_outputs.len(), total_nodes);

    if !result.node_outputs.is_empty() {
        println!();
        println!("📤 Outputs:");
        let mut outputs: Vec<_> = result.node_outputs.iter().collect();
        outputs.sort_by(|a, b| a.0.cmp(b.0));
        for (node_id, output) in outputs {
            println!("   Node {}: {}", node_id, output.to_json());
        }
    }

    Ok(())
}

async fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = loader::load_workflow_file(file).await?;
    let registry = standard_registry()?;

    match flowruntime::validate_workflow(&workflow, &registry) {
        Ok(()) => {
            println!("✅ Workflow is valid:");
            println!("   Name: {}", workflow.name);
            println!("   Nodes: {}", workflow.nodes.len());
            println!("   Edges: {}", workflow.edges.len());
            Ok(())
        }
        Err(e) => {
            println!("❌ Workflow is invalid:");
            for issue in e.issues() {
                println!("   • {}", issue);
            }
            Err(e.into())
        }
    }
}

fn list_nodes(category: Option<NodeCategory>) -> Result<()> {
    println!("📦 Available Node Types:");
    println!();

    let registry = standard_registry()?;
    let nodes = match category {
        Some(category) => registry.get_nodes_by_category(category),
        None => registry.get_all_nodes(),
    };
    for definition in nodes {
        println!("  • {} ({})", definition.node_type, definition.category);
        println!("    {}", definition.description);
    }

    let stats = registry.get_statistics();
    println!();
    println!("   {} node types, {} with config validation", stats.total_nodes, stats.nodes_with_validator);
    Ok(())
}

fn search_nodes(query: &str) -> Result<()> {
    let registry = standard_registry()?;
    let found = registry.search_nodes(query);
    if found.is_empty() {
        println!("No node types match '{}'", query);
    }
    for definition in found {
        println!("  • {} ({}) - {}", definition.node_type, definition.category, definition.label);
    }
    Ok(())
}

async fn run_scheduler(config: FlowConfig, dir: PathBuf) -> Result<()> {
    println!("🕒 Scheduling workflows from: {}", dir.display());

    let repository = Arc::new(FileWorkflowRepository::new(dir));
    let registry = Arc::new(RwLock::new(standard_registry()?));
    let scheduler = WorkflowScheduler::new(repository, registry, config.scheduler);

    let event_task = spawn_printer(scheduler.subscribe_events());
    let count = scheduler.initialize().await?;
    println!("   {} workflow(s) scheduled, press Ctrl-C to stop", count);

    tokio::signal::ctrl_c().await?;
    println!();
    println!("🛑 Shutting down scheduler");

    let stats = scheduler.get_statistics().await;
    scheduler.shutdown().await;
    event_task.abort();

    println!("   Total scheduled runs: {}", stats.total_runs);
    Ok(())
}

fn example_workflow(cron: Option<String>) -> Workflow {
    let mut workflow = Workflow::new("example-http", "Example HTTP Workflow");
    workflow.description = Some("Fetches data from an API and logs the result".to_string());

    let fetch = workflow.add_node(
        WorkflowNode::new("fetch", "http.request")
            .start()
            .with_label("Fetch Data")
            .with_config("method", "GET")
            .with_input("url", "context.url"),
    );
    let log = workflow.add_node(
        WorkflowNode::new("log", "debug.log")
            .with_label("Log Response")
            .with_input("message", "$fetch.body"),
    );
    workflow.connect_when(fetch, log, "ok == true");

    if let Some(expression) = cron {
        workflow = workflow.with_trigger(TriggerSpec::cron(expression));
    }
    workflow
}

async fn create_example_workflow(output: &Path, cron: Option<String>) -> Result<()> {
    if let Some(expression) = &cron {
        // Fail before writing anything
        flowruntime::CronExpression::parse(expression)?;
    }

    let json = serde_json::to_string_pretty(&example_workflow(cron))?;
    tokio::fs::write(output, json)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  flow run --file {} --input '{{\"url\": \"https://api.github.com/zen\"}}'", output.display());

    Ok(())
}
