//! Pipeline settings.

use std::path::{Path, PathBuf};

use hexsmith_chat::KnowledgeConfig;

/// Runtime settings, usually read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Project directory containing the manifest
    pub project_dir: PathBuf,
    pub port: u16,
    /// Repair failed builds even when the request does not ask for it
    pub auto_fix: bool,
    /// Emit debug transcripts for every request
    pub debug: bool,
    /// Pipe generated sources through the formatter
    pub format_sources: bool,
    /// Interpreter tried after the project virtualenv
    pub python_exe: Option<String>,
    /// Reference document handed to the retrieval server
    pub codes_md: Option<PathBuf>,
}

impl Settings {
    pub const DEFAULT_PORT: u16 = 3000;

    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            port: Self::DEFAULT_PORT,
            auto_fix: false,
            debug: false,
            format_sources: true,
            python_exe: None,
            codes_md: None,
        }
    }

    pub fn from_env(project_dir: impl Into<PathBuf>) -> Self {
        Self::from_lookup(project_dir, |key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(project_dir: impl Into<PathBuf>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::new(project_dir);

        Self {
            port: value("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            auto_fix: value("AI_AUTOFIX").is_some_and(|v| is_enabled(&v)),
            debug: value("AI_DEBUG").is_some_and(|v| is_enabled(&v)),
            format_sources: value("AI_FORMAT_TS").map_or(true, |v| !is_disabled(&v)),
            python_exe: value("PYTHON_EXE"),
            codes_md: value("CODES_MD_PATH").map(PathBuf::from),
            ..defaults
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Directory holding the project and its sibling tools.
    pub fn repo_root(&self) -> &Path {
        self.project_dir.parent().unwrap_or(&self.project_dir)
    }

    /// Retrieval server location derived from the repository layout.
    pub fn knowledge_config(&self) -> KnowledgeConfig {
        let root = self.repo_root();
        let config = KnowledgeConfig::for_repo(root);
        let interpreters =
            KnowledgeConfig::default_interpreters(&config.server_dir, self.python_exe.clone());
        let config = config.interpreters(interpreters);
        match &self.codes_md {
            Some(path) => config.document(path.clone()),
            None => config,
        }
    }
}

fn is_enabled(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn is_disabled(value: &str) -> bool {
    value == "0" || value.eq_ignore_ascii_case("false")
}
