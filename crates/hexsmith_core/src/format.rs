//! Best-effort source formatting through `prettier`.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Pipes TypeScript through an external formatter.
///
/// Any failure (formatter missing, non-zero exit, timeout, empty output)
/// returns the input unchanged.
#[derive(Debug, Clone)]
pub struct SourceFormatter {
    enabled: bool,
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl SourceFormatter {
    /// `npx --no-install prettier` with the TypeScript parser.
    pub fn prettier() -> Self {
        let program = if cfg!(windows) { "npx.cmd" } else { "npx" };
        Self {
            enabled: true,
            program: program.to_string(),
            args: [
                "--no-install",
                "prettier",
                "--parser",
                "typescript",
                "--single-quote",
                "--trailing-comma",
                "all",
            ]
            .map(String::from)
            .to_vec(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::prettier()
        }
    }

    /// Use an arbitrary command reading source on stdin.
    pub fn command(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            enabled: true,
            program: program.into(),
            args,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn format(&self, source: &str) -> String {
        if !self.enabled {
            return source.to_string();
        }
        match tokio::time::timeout(self.timeout, self.run(source)).await {
            Ok(Some(formatted)) if !formatted.trim().is_empty() => formatted,
            Ok(_) => source.to_string(),
            Err(_) => {
                debug!(program = %self.program, "[FORMAT] Timed out, keeping original");
                source.to_string()
            }
        }
    }

    async fn run(&self, source: &str) -> Option<String> {
        let spawned = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                debug!(program = %self.program, "[FORMAT] Not available: {}", e);
                return None;
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(source.as_bytes()).await.ok()?;
        }
        let output = child.wait_with_output().await.ok()?;
        if !output.status.success() {
            debug!(status = ?output.status.code(), "[FORMAT] Formatter failed, keeping original");
            return None;
        }
        String::from_utf8(output.stdout).ok()
    }
}

impl Default for SourceFormatter {
    fn default() -> Self {
        Self::prettier()
    }
}
