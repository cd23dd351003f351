//! Error types for the project module.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for project operations.
pub type ProjectResult<T> = Result<T, ProjectError>;

/// Errors that can occur during project operations.
#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("Project manifest not found at path: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Invalid manifest {path}: {message}")]
    InvalidManifest { path: PathBuf, message: String },

    /// A file name that would escape the project directory.
    #[error("Invalid project file name: {0}")]
    InvalidFileName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
