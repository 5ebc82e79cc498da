// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph documents on disk.

use stagewire_graph::{Container, LoadError, LoadSummary};
use std::path::Path;
use thiserror::Error;

/// Failures while reading or writing a graph file
#[derive(Debug, Error)]
pub enum GraphFileError {
    /// Reading or writing the file failed
    #[error("graph file I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not JSON
    #[error("graph file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The JSON is not a container document
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Replace `root` with the graph stored at `path`
pub fn load_graph(path: &Path, root: &mut Container) -> Result<LoadSummary, GraphFileError> {
    let content = std::fs::read_to_string(path)?;
    let document: serde_json::Value = serde_json::from_str(&content)?;
    let summary = root.load_document(&document)?;

    tracing::info!(
        path = %path.display(),
        nodes = summary.nodes,
        containers = summary.containers,
        edges = summary.edges,
        skipped = summary.skipped,
        "Loaded graph"
    );
    Ok(summary)
}

/// Write `root` to `path` as pretty-printed JSON
pub fn save_graph(path: &Path, root: &Container) -> Result<(), GraphFileError> {
    let content = serde_json::to_string_pretty(&root.to_document())?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;

    tracing::info!(path = %path.display(), "Saved graph");
    Ok(())
}
