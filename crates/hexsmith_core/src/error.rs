//! Error types for the core module.

use std::path::PathBuf;

use hexsmith_chat::ChatError;
use hexsmith_project::ProjectError;
use hexsmith_runner::RunnerError;
use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while running the build pipeline.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error("Generation error: {0}")]
    Chat(#[from] ChatError),

    /// The build reported success but left no artifact behind.
    #[error("Build completed but artifact not found at {}", expected.display())]
    ArtifactMissing {
        expected: PathBuf,
        listing: Vec<String>,
        stdout: String,
        stderr: String,
    },

    /// The single repair cycle could not produce a rebuildable file.
    #[error("Auto-fix failed: {0}")]
    AutoFixExhausted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Captured tool stdout, if any.
    pub fn stdout(&self) -> &str {
        match self {
            Self::Runner(e) => e.stdout(),
            Self::ArtifactMissing { stdout, .. } => stdout,
            _ => "",
        }
    }

    /// Captured tool stderr, if any.
    pub fn stderr(&self) -> &str {
        match self {
            Self::Runner(e) => e.stderr(),
            Self::ArtifactMissing { stderr, .. } => stderr,
            _ => "",
        }
    }

    /// Whether a repair of the sources could plausibly help.
    pub fn is_repairable(&self) -> bool {
        matches!(self, Self::Runner(RunnerError::BuildFailed { .. }))
    }

    /// Text handed to the repair request.
    pub fn repair_input(&self) -> String {
        match self {
            Self::Runner(e) => e.diagnostics(),
            other => other.to_string(),
        }
    }
}
