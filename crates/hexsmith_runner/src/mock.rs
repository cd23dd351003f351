//! Mock command runner for testing.
//!
//! Provides a scripted implementation of [`CommandRunner`] for tests that
//! must not depend on the real build tool being installed.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandRunner, ExecutionResult};

/// Predefined mock response for a command execution.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Fail at spawn time instead of running
    pub spawn_error: bool,
    /// Files written relative to the working directory when the command runs
    pub writes: Vec<(PathBuf, Vec<u8>)>,
    /// Real time the call takes before it returns
    pub delay: Option<Duration>,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms: 100,
            spawn_error: false,
            writes: Vec::new(),
            delay: None,
        }
    }

    pub fn failure(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration_ms: 100,
            spawn_error: false,
            writes: Vec::new(),
            delay: None,
        }
    }

    /// What `sh` reports for an unknown command.
    pub fn not_found(command: &str) -> Self {
        let program = command.split_whitespace().next().unwrap_or(command);
        Self::failure(127, format!("sh: 1: {}: not found", program))
    }

    /// The process cannot be spawned at all.
    pub fn spawn_error() -> Self {
        Self {
            spawn_error: true,
            ..Self::failure(-1, "")
        }
    }

    /// Write a file (relative to the working directory) when this response is used.
    pub fn writes(mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        self.writes.push((path.into(), contents.into()));
        self
    }

    pub fn with_duration(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    /// Hold the call open for `ms` milliseconds of real time.
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(ms));
        self.duration_ms = ms;
        self
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub command: String,
    pub workdir: PathBuf,
    pub env: HashMap<String, String>,
}

/// Mock command runner.
///
/// Responses are queued per command line; a command with no queued
/// response falls back to the default queue, and then to an empty success.
/// The last response of a queue is repeated once the queue runs dry.
#[derive(Clone, Default)]
pub struct MockRunner {
    per_command: Arc<RwLock<HashMap<String, VecDeque<MockResponse>>>>,
    default_responses: Arc<RwLock<VecDeque<MockResponse>>>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

/// Counts a call as running until dropped.
struct InFlight<'a> {
    count: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(count: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = count.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self { count }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for a specific command line.
    pub fn respond(self, command: impl Into<String>, response: MockResponse) -> Self {
        self.per_command
            .write()
            .entry(command.into())
            .or_default()
            .push_back(response);
        self
    }

    /// Queue a response for any command without a specific script.
    pub fn add_response(self, response: MockResponse) -> Self {
        self.default_responses.write().push_back(response);
        self
    }

    /// Set multiple default responses.
    pub fn with_responses(self, responses: Vec<MockResponse>) -> Self {
        *self.default_responses.write() = responses.into();
        self
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Command lines in execution order.
    pub fn commands(&self) -> Vec<String> {
        self.captured_calls
            .read()
            .iter()
            .map(|c| c.command.clone())
            .collect()
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    /// Highest number of calls that were running at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Clear all captured calls.
    pub fn clear_calls(&self) {
        self.captured_calls.write().clear();
    }

    fn pop(queue: &mut VecDeque<MockResponse>) -> Option<MockResponse> {
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn next_response(&self, command: &str) -> MockResponse {
        if let Some(queue) = self.per_command.write().get_mut(command) {
            if let Some(response) = Self::pop(queue) {
                return response;
            }
        }
        Self::pop(&mut self.default_responses.write()).unwrap_or_else(|| MockResponse::success(""))
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(
        &self,
        command: &str,
        workdir: &Path,
        env: &HashMap<String, String>,
    ) -> RunnerResult<ExecutionResult> {
        self.captured_calls.write().push(CapturedCall {
            command: command.to_string(),
            workdir: workdir.to_path_buf(),
            env: env.clone(),
        });

        let _running = InFlight::enter(&self.in_flight, &self.max_in_flight);
        let response = self.next_response(command);
        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }
        if response.spawn_error {
            return Err(RunnerError::Spawn {
                command: command.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "mock spawn failure"),
            });
        }

        for (relative, contents) in &response.writes {
            let path = workdir.join(relative);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, contents).await?;
        }

        let started_at = Utc::now();
        let finished_at = started_at + chrono::Duration::milliseconds(response.duration_ms as i64);

        Ok(ExecutionResult {
            command: command.to_string(),
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            started_at,
            finished_at,
            duration_ms: response.duration_ms,
        })
    }
}
