//! Error types for the graph store

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Graph '{0}' already exists")]
    AlreadyExists(String),

    #[error("Graph '{0}' not found")]
    GraphNotFound(String),

    #[error("Key '{key}' not found in graph '{graph}'")]
    KeyNotFound { graph: String, key: String },

    #[error("Shard unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GraphError {
    /// Get error code for wire protocol
    pub fn code(&self) -> &'static str {
        match self {
            GraphError::InvalidArgument(_) => "INVALID_ARGUMENT",
            GraphError::AlreadyExists(_) => "ALREADY_EXISTS",
            GraphError::GraphNotFound(_) => "GRAPH_NOT_FOUND",
            GraphError::KeyNotFound { .. } => "KEY_NOT_FOUND",
            GraphError::Unavailable(_) => "UNAVAILABLE",
            _ => "INTERNAL_ERROR",
        }
    }

    /// True for both missing graphs and missing keys.
    pub fn is_not_found(&self) -> bool {
        matches!(self, GraphError::GraphNotFound(_) | GraphError::KeyNotFound { .. })
    }

    pub(crate) fn key_not_found(graph: &str, key: &str) -> Self {
        GraphError::KeyNotFound {
            graph: graph.to_string(),
            key: key.to_string(),
        }
    }
}
