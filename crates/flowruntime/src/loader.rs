// crates/flowruntime/src/loader.rs
use flowcore::Workflow;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse workflow {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Workflow id '{0}' cannot be used as a file name")]
    InvalidId(String),
}

/// Load a single workflow definition from a JSON file
pub async fn load_workflow_file(path: &Path) -> Result<Workflow, LoadError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_str(&contents).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load every `*.json` workflow in a directory, sorted by workflow id
pub async fn load_workflows_from_dir(dir: &Path) -> Result<Vec<Workflow>, LoadError> {
    let io_err = |source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut workflows = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();
        if path.extension() == Some("json".as_ref()) {
            workflows.push(load_workflow_file(&path).await?);
        }
    }

    tracing::debug!(dir = %dir.display(), count = workflows.len(), "Loaded workflows");
    workflows.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(workflows)
}

/// Write a workflow as pretty JSON to `<dir>/<id>.json`
pub async fn save_workflow(dir: &Path, workflow: &Workflow) -> Result<PathBuf, LoadError> {
    let id = workflow.id.as_str();
    if id.is_empty() || id.starts_with('.') || id.contains(['/', '\\', '\0']) {
        return Err(LoadError::InvalidId(workflow.id.clone()));
    }
    let path = dir.join(format!("{id}.json"));
    let json = serde_json::to_string_pretty(workflow).map_err(|source| LoadError::Parse {
        path: path.clone(),
        source,
    })?;
    tokio::fs::write(&path, json)
        .await
        .map_err(|source| LoadError::Io {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}
