//! Error types for the runner module.

use thiserror::Error;

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that can occur during runner operations.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// No candidate command was recognized by the host shell.
    #[error("Build tool not found (tried: {})", tried.join(", "))]
    ToolNotFound { tried: Vec<String> },

    /// The tool ran but reported a failure.
    #[error("Build failed: `{command}` exited with code {exit_code}")]
    BuildFailed {
        command: String,
        exit_code: i64,
        stdout: String,
        stderr: String,
    },

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Captured stdout, if the error carries process output.
    pub fn stdout(&self) -> &str {
        match self {
            Self::BuildFailed { stdout, .. } => stdout,
            _ => "",
        }
    }

    /// Captured stderr, if the error carries process output.
    pub fn stderr(&self) -> &str {
        match self {
            Self::BuildFailed { stderr, .. } => stderr,
            _ => "",
        }
    }

    /// Text best describing what went wrong, preferring tool output.
    pub fn diagnostics(&self) -> String {
        match self {
            Self::BuildFailed { stdout, stderr, .. } => {
                if !stderr.trim().is_empty() {
                    stderr.clone()
                } else if !stdout.trim().is_empty() {
                    stdout.clone()
                } else {
                    self.to_string()
                }
            }
            other => other.to_string(),
        }
    }
}
