//! Shell-based command runner.
//!
//! Commands are handed to the platform shell (`sh -c` / `cmd /C`) so that
//! quoting and `PATH` lookup behave exactly as they would for a user typing
//! the command. Output is captured line by line and optionally streamed.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult};

/// A single line of process output.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: chrono::DateTime<Utc>,
    pub stream: LogStream,
    pub message: String,
}

/// Log stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Log handler callback type.
pub type LogHandler = Arc<dyn Fn(LogLine) + Send + Sync>;

/// Shell runner options.
#[derive(Debug, Clone, Default)]
pub struct ShellRunnerOptions {
    /// Print commands without executing them
    pub dry_run: bool,
    /// Emit each output line as a debug trace while running
    pub stream_logs: bool,
}

impl ShellRunnerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn stream_logs(mut self) -> Self {
        self.stream_logs = true;
        self
    }
}

/// Runs commands through the host shell.
#[derive(Clone, Default)]
pub struct ShellRunner {
    options: ShellRunnerOptions,
    log_handler: Option<LogHandler>,
}

impl ShellRunner {
    pub fn new(options: ShellRunnerOptions) -> Self {
        Self {
            options,
            log_handler: None,
        }
    }

    /// Set a log handler for streaming output lines.
    pub fn with_log_handler(mut self, handler: LogHandler) -> Self {
        self.log_handler = Some(handler);
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    fn shell() -> (&'static str, &'static str) {
        if cfg!(windows) {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        }
    }

    fn collect<R>(
        reader: R,
        stream: LogStream,
        stream_logs: bool,
        handler: Option<LogHandler>,
    ) -> tokio::task::JoinHandle<String>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            let mut output = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if stream_logs {
                    debug!(%stream, "{}", line);
                }
                if let Some(handler) = &handler {
                    handler(LogLine {
                        timestamp: Utc::now(),
                        stream,
                        message: line.clone(),
                    });
                }
                output.push_str(&line);
                output.push('\n');
            }
            output
        })
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(
        &self,
        command: &str,
        workdir: &Path,
        env: &HashMap<String, String>,
    ) -> RunnerResult<ExecutionResult> {
        if self.options.dry_run {
            info!("[DRY-RUN] Would execute: {} (cwd={})", command, workdir.display());
            let now = Utc::now();
            return Ok(ExecutionResult {
                command: command.to_string(),
                exit_code: 0,
                stdout: format!("[DRY-RUN] Command: {}", command),
                stderr: String::new(),
                started_at: now,
                finished_at: now,
                duration_ms: 0,
            });
        }

        let (shell, flag) = Self::shell();
        let mut cmd = Command::new(shell);
        cmd.arg(flag)
            .arg(command)
            .current_dir(workdir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started_at = Utc::now();
        let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let stdout_task = child.stdout.take().map(|out| {
            Self::collect(out, LogStream::Stdout, self.options.stream_logs, self.log_handler.clone())
        });
        let stderr_task = child.stderr.take().map(|err| {
            Self::collect(err, LogStream::Stderr, self.options.stream_logs, self.log_handler.clone())
        });

        let status = child.wait().await?;

        let stdout = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        Ok(ExecutionResult {
            command: command.to_string(),
            exit_code: status.code().map(i64::from).unwrap_or(-1),
            stdout,
            stderr,
            started_at,
            finished_at,
            duration_ms,
        })
    }
}
