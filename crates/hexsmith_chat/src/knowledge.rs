//! Knowledge retrieval over a line-delimited JSON subprocess.
//!
//! The retrieval server is a small Python module that answers one JSON
//! request per line on stdin with one JSON response per line on stdout. We
//! ask a single question per generation, read the first response line and
//! kill the process. A fixed timeout bounds the whole exchange.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{ChatError, ChatResult};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);
pub const DEFAULT_MODULE: &str = "mcp_codes_server.server";

/// One section of reference material with its snippets, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeSection {
    pub id: String,
    pub snippets: Vec<String>,
}

/// What the retrieval server returned.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum KnowledgeContent {
    Sections(Vec<KnowledgeSection>),
    Raw(String),
    #[default]
    Empty,
}

/// Subprocess exchange record for debug output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub interpreter: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Result of one retrieval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeResult {
    pub content: KnowledgeContent,
    pub transcript: Transcript,
}

impl KnowledgeResult {
    pub fn is_empty(&self) -> bool {
        match &self.content {
            KnowledgeContent::Sections(sections) => sections.is_empty(),
            KnowledgeContent::Raw(text) => text.trim().is_empty(),
            KnowledgeContent::Empty => true,
        }
    }
}

/// Source of reference material for prompts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Search for `query`, or list sections when the query is blank.
    async fn query(&self, query: &str) -> ChatResult<KnowledgeResult>;
}

/// Where and how to start the retrieval server.
#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    /// Working directory of the server (its package lives under `src/`)
    pub server_dir: PathBuf,
    /// Python module to run with `-m`
    pub module: String,
    /// Reference document, passed as `CODES_MD_PATH`
    pub document: PathBuf,
    /// Interpreters tried in order until one spawns
    pub interpreters: Vec<String>,
    pub timeout: Duration,
    pub context_lines: u32,
}

impl KnowledgeConfig {
    /// Layout of a repository with `mcp-codes-server/` and `codes.md` at its root.
    pub fn for_repo(repo_root: impl AsRef<Path>) -> Self {
        let root = repo_root.as_ref();
        let server_dir = root.join("mcp-codes-server");
        let interpreters = Self::default_interpreters(&server_dir, std::env::var("PYTHON_EXE").ok());
        Self {
            server_dir,
            module: DEFAULT_MODULE.to_string(),
            document: root.join("codes.md"),
            interpreters,
            timeout: DEFAULT_TIMEOUT,
            context_lines: 1,
        }
    }

    /// Virtual-environment interpreter (if present), the override, then bare names.
    pub fn default_interpreters(server_dir: &Path, override_exe: Option<String>) -> Vec<String> {
        let venv = if cfg!(windows) {
            server_dir.join(".venv").join("Scripts").join("python.exe")
        } else {
            server_dir.join(".venv").join("bin").join("python")
        };

        let mut candidates = Vec::new();
        if venv.exists() {
            candidates.push(venv.to_string_lossy().to_string());
        }
        if let Some(exe) = override_exe.filter(|e| !e.trim().is_empty()) {
            candidates.push(exe);
        }
        candidates.extend(["python", "python3", "py"].map(String::from));
        candidates
    }

    pub fn document(mut self, path: impl Into<PathBuf>) -> Self {
        self.document = path.into();
        self
    }

    pub fn interpreters(mut self, interpreters: Vec<String>) -> Self {
        self.interpreters = interpreters;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `PYTHONPATH` with the server's `src/` directory appended.
    fn python_path(&self) -> OsString {
        let src = self.server_dir.join("src");
        let mut paths: Vec<PathBuf> = std::env::var_os("PYTHONPATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        paths.push(src.clone());
        std::env::join_paths(paths).unwrap_or_else(|_| src.into_os_string())
    }

    /// The single request line for `query`.
    pub fn request_line(&self, query: &str) -> String {
        let request = if query.trim().is_empty() {
            json!({ "method": "list_sections" })
        } else {
            json!({
                "method": "search",
                "params": { "query": query, "context_lines": self.context_lines },
            })
        };
        format!("{}\n", request)
    }
}

/// Subprocess-backed [`KnowledgeSource`].
#[derive(Debug, Clone)]
pub struct KnowledgeClient {
    config: KnowledgeConfig,
}

impl KnowledgeClient {
    pub fn new(config: KnowledgeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KnowledgeConfig {
        &self.config
    }

    fn spawn(&self, interpreter: &str) -> std::io::Result<Child> {
        Command::new(interpreter)
            .arg("-m")
            .arg(&self.config.module)
            .current_dir(&self.config.server_dir)
            .env("CODES_MD_PATH", &self.config.document)
            .env("PYTHONPATH", self.config.python_path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }

    async fn exchange(
        &self,
        mut child: Child,
        interpreter: &str,
        request: &str,
    ) -> ChatResult<KnowledgeResult> {
        let mut transcript = Transcript {
            interpreter: Some(interpreter.to_string()),
            ..Default::default()
        };

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let stderr_task = child.stderr.take().map(|err| {
            let sink = stderr_buf.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut buf = sink.lock();
                    buf.push_str(&line);
                    buf.push('\n');
                }
            })
        });

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(request.as_bytes()).await {
                warn!(interpreter, "Failed to write retrieval request: {}", e);
            }
            let _ = stdin.flush().await;
        }

        let first_line = match child.stdout.take() {
            Some(out) => {
                let mut lines = BufReader::new(out).lines();
                tokio::time::timeout(self.config.timeout, async move {
                    while let Ok(Some(line)) = lines.next_line().await {
                        if !line.trim().is_empty() {
                            return Some(line);
                        }
                    }
                    None
                })
                .await
            }
            None => Ok(None),
        };

        let _ = child.kill().await;
        if let Some(mut task) = stderr_task {
            // Grandchildren may still hold the pipe open.
            if tokio::time::timeout(Duration::from_millis(500), &mut task).await.is_err() {
                task.abort();
            }
        }
        transcript.stderr = stderr_buf.lock().clone();

        match first_line {
            Err(_) => {
                transcript.timed_out = true;
                warn!(
                    interpreter,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "Knowledge retrieval timed out"
                );
                Err(ChatError::RetrievalTimeout {
                    timeout_ms: self.config.timeout.as_millis() as u64,
                    transcript,
                })
            }
            Ok(None) => {
                debug!(interpreter, "Retrieval server closed without a response");
                Ok(KnowledgeResult {
                    content: KnowledgeContent::Empty,
                    transcript,
                })
            }
            Ok(Some(line)) => {
                transcript.stdout = line.clone();
                Ok(KnowledgeResult {
                    content: parse_response(&line),
                    transcript,
                })
            }
        }
    }
}

#[async_trait]
impl KnowledgeSource for KnowledgeClient {
    async fn query(&self, query: &str) -> ChatResult<KnowledgeResult> {
        let request = self.config.request_line(query);

        for interpreter in &self.config.interpreters {
            let child = match self.spawn(interpreter) {
                Ok(child) => child,
                Err(e) => {
                    debug!(interpreter = %interpreter, "Could not start interpreter: {}", e);
                    continue;
                }
            };
            info!(interpreter = %interpreter, "Querying knowledge server");
            return self.exchange(child, interpreter, &request).await;
        }

        Err(ChatError::RetrievalUnavailable(format!(
            "no interpreter could be started (tried: {})",
            self.config.interpreters.join(", ")
        )))
    }
}

/// Interpret one response envelope.
///
/// A sequence result is a list of sections: plain strings are section
/// titles, `{line, snippet}` objects are search hits. Any other result is
/// raw reference text. Errors and unparseable lines yield no content.
pub fn parse_response(line: &str) -> KnowledgeContent {
    let Ok(envelope) = serde_json::from_str::<Value>(line) else {
        warn!("Unparseable retrieval response");
        return KnowledgeContent::Empty;
    };

    match envelope.get("result") {
        Some(Value::Array(items)) => KnowledgeContent::Sections(items.iter().map(section).collect()),
        Some(Value::String(text)) => KnowledgeContent::Raw(text.clone()),
        Some(Value::Null) | None => {
            if let Some(error) = envelope.get("error") {
                warn!("Retrieval server error: {}", error);
            }
            KnowledgeContent::Empty
        }
        Some(other) => KnowledgeContent::Raw(other.to_string()),
    }
}

fn section(item: &Value) -> KnowledgeSection {
    match item {
        Value::String(title) => KnowledgeSection {
            id: title.clone(),
            snippets: Vec::new(),
        },
        Value::Object(hit) => {
            let id = match hit.get("line") {
                Some(line) => format!("line {}", line),
                None => "match".to_string(),
            };
            let snippets = hit
                .get("snippet")
                .and_then(Value::as_str)
                .map(|s| vec![s.to_string()])
                .unwrap_or_default();
            KnowledgeSection { id, snippets }
        }
        other => KnowledgeSection {
            id: other.to_string(),
            snippets: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_line() {
        let config = KnowledgeConfig::for_repo("/repo");
        let search: Value = serde_json::from_str(config.request_line("move forward").trim()).unwrap();
        assert_eq!(search["method"], "search");
        assert_eq!(search["params"]["query"], "move forward");
        assert_eq!(search["params"]["context_lines"], 1);

        let list: Value = serde_json::from_str(config.request_line("  ").trim()).unwrap();
        assert_eq!(list, json!({"method": "list_sections"}));
    }

    #[test]
    fn test_default_interpreters_order() {
        let dir = tempfile::tempdir().unwrap();
        let plain = KnowledgeConfig::default_interpreters(dir.path(), None);
        assert_eq!(plain, vec!["python", "python3", "py"]);

        let with_override =
            KnowledgeConfig::default_interpreters(dir.path(), Some("/opt/py/bin/python".into()));
        assert_eq!(with_override[0], "/opt/py/bin/python");
    }

    #[test]
    fn test_parse_sections_and_hits() {
        let titles = parse_response(r#"{"result":["Motors","Headlights"]}"#);
        assert_eq!(
            titles,
            KnowledgeContent::Sections(vec![
                KnowledgeSection { id: "Motors".into(), snippets: vec![] },
                KnowledgeSection { id: "Headlights".into(), snippets: vec![] },
            ])
        );

        let hits = parse_response(r#"{"result":[{"line":12,"snippet":"zoombit.brake()"}]}"#);
        assert_eq!(
            hits,
            KnowledgeContent::Sections(vec![KnowledgeSection {
                id: "line 12".into(),
                snippets: vec!["zoombit.brake()".into()],
            }])
        );
    }

    #[test]
    fn test_parse_raw_and_errors() {
        assert_eq!(
            parse_response(r##"{"result":"# Codes"}"##),
            KnowledgeContent::Raw("# Codes".into())
        );
        assert_eq!(
            parse_response(r#"{"error":{"code":-32601,"message":"Method not found"}}"#),
            KnowledgeContent::Empty
        );
        assert_eq!(parse_response("not json"), KnowledgeContent::Empty);
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn script(dir: &Path, name: &str, body: &str) -> String {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().to_string()
        }

        fn config(dir: &Path, interpreters: Vec<String>) -> KnowledgeConfig {
            KnowledgeConfig::for_repo(dir)
                .document(dir.join("request.json"))
                .interpreters(interpreters)
        }

        #[tokio::test]
        async fn test_reads_first_response_line() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("mcp-codes-server")).unwrap();
            let py = script(
                dir.path(),
                "fake-python",
                "read line\necho \"$line\" > \"$CODES_MD_PATH\"\necho ''\necho '{\"result\":[\"Motors\"]}'\nexec sleep 30",
            );

            let client = KnowledgeClient::new(config(dir.path(), vec![py.clone()]));
            let result = client.query("brake").await.unwrap();

            assert_eq!(
                result.content,
                KnowledgeContent::Sections(vec![KnowledgeSection {
                    id: "Motors".into(),
                    snippets: vec![]
                }])
            );
            assert_eq!(result.transcript.interpreter.as_deref(), Some(py.as_str()));
            assert!(!result.transcript.timed_out);

            let sent: Value =
                serde_json::from_str(&std::fs::read_to_string(dir.path().join("request.json")).unwrap())
                    .unwrap();
            assert_eq!(sent["method"], "search");
            assert_eq!(sent["params"]["query"], "brake");
        }

        #[tokio::test]
        async fn test_spawn_failure_tries_next_interpreter() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("mcp-codes-server")).unwrap();
            let py = script(dir.path(), "fake-python", "read line\necho '{\"result\":\"raw text\"}'");

            let client = KnowledgeClient::new(config(
                dir.path(),
                vec!["/nonexistent/hexsmith-python".into(), py],
            ));
            let result = client.query("").await.unwrap();
            assert_eq!(result.content, KnowledgeContent::Raw("raw text".into()));
        }

        #[tokio::test]
        async fn test_timeout_kills_and_reports() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("mcp-codes-server")).unwrap();
            let py = script(dir.path(), "slow-python", "echo starting >&2\nexec sleep 30");

            let client = KnowledgeClient::new(
                config(dir.path(), vec![py]).timeout(Duration::from_millis(300)),
            );
            let started = std::time::Instant::now();
            let err = client.query("anything").await.unwrap_err();

            assert!(started.elapsed() < Duration::from_secs(5));
            match err {
                ChatError::RetrievalTimeout { timeout_ms, transcript } => {
                    assert_eq!(timeout_ms, 300);
                    assert!(transcript.timed_out);
                    assert!(transcript.stderr.contains("starting"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn test_no_interpreter_available() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("mcp-codes-server")).unwrap();
            let client = KnowledgeClient::new(config(
                dir.path(),
                vec!["/nonexistent/a".into(), "/nonexistent/b".into()],
            ));
            assert!(matches!(
                client.query("x").await,
                Err(ChatError::RetrievalUnavailable(_))
            ));
        }
    }
}
