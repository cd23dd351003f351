//! Candidate-cascade build execution.
//!
//! The build tool can be installed in several ways (on `PATH`, as an npm
//! global shim, or only reachable through `npx`). The executor tries each
//! candidate in order, moving on only when the shell reports that the
//! command itself was not recognized. Candidates never run concurrently.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::BuildConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult};

/// Output fragments shells print when the command does not exist.
const NOT_FOUND_PATTERNS: &[&str] = &[
    "is not recognized",
    "not recognized as an internal or external command",
    "command not found",
    "enoent",
];

/// Exit codes shells use for an unknown command (`sh`, `cmd.exe`).
const NOT_FOUND_EXIT_CODES: &[i64] = &[127, 9009];

/// Lowercased program of a command line, without quotes or directories.
fn program_name(command: &str) -> Option<String> {
    let first = command.split_whitespace().next()?;
    let first = first.trim_matches(|c| c == '"' || c == '\'');
    let name = first.rsplit(['/', '\\']).next().unwrap_or(first);
    (!name.is_empty()).then(|| name.to_lowercase())
}

/// Runs the build through the first recognized candidate command.
#[derive(Clone)]
pub struct BuildExecutor {
    runner: Arc<dyn CommandRunner>,
}

impl BuildExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Check whether a finished execution means "command not recognized".
    ///
    /// The shell exit code decides first. Otherwise a not-found message only
    /// counts when the same line names the candidate's own program, so a
    /// compiler reporting a missing source file stays a build failure.
    pub fn is_not_recognized(result: &ExecutionResult) -> bool {
        if result.success() {
            return false;
        }
        if NOT_FOUND_EXIT_CODES.contains(&result.exit_code) {
            return true;
        }
        let Some(program) = program_name(&result.command) else {
            return false;
        };
        result.combined_output().lines().any(|line| {
            let line = line.to_lowercase();
            NOT_FOUND_PATTERNS.iter().any(|p| line.contains(p))
                && line
                    .split(|c: char| !(c.is_alphanumeric() || matches!(c, '-' | '_' | '.')))
                    .any(|word| word == program)
        })
    }

    /// Execute the build.
    ///
    /// Returns the first successful execution. A recognized command that
    /// fails ends the cascade with [`RunnerError::BuildFailed`]; running out
    /// of candidates yields [`RunnerError::ToolNotFound`].
    pub async fn run(&self, config: &BuildConfig) -> RunnerResult<ExecutionResult> {
        let mut tried = Vec::with_capacity(config.candidates.len());

        for command in &config.candidates {
            info!(command = %command, cwd = %config.workdir.display(), "[BUILD] Running");
            tried.push(command.clone());

            let result = match self.runner.run(command, &config.workdir, &config.env).await {
                Ok(result) => result,
                Err(RunnerError::Spawn { source, .. })
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    warn!(command = %command, "[BUILD] Could not spawn, trying next: {}", source);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if result.success() {
                info!(
                    command = %command,
                    duration_ms = result.duration_ms,
                    "[BUILD] Command succeeded"
                );
                return Ok(result);
            }

            if Self::is_not_recognized(&result) {
                warn!(
                    command = %command,
                    exit_code = result.exit_code,
                    "[BUILD] Command not recognized, trying next"
                );
                continue;
            }

            error!(command = %command, exit_code = result.exit_code, "[BUILD] Failed");
            if !result.stderr.is_empty() {
                error!("[BUILD][stderr]\n{}", result.stderr);
            }
            if !result.stdout.is_empty() {
                error!("[BUILD][stdout]\n{}", result.stdout);
            }
            return Err(RunnerError::BuildFailed {
                command: result.command,
                exit_code: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }

        error!(?tried, "[BUILD] No build tool candidate was recognized");
        Err(RunnerError::ToolNotFound { tried })
    }
}
