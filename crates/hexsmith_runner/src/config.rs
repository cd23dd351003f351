//! Build command configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Ordered list of candidate build invocations plus where to run them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Candidate command lines, tried in order
    pub candidates: Vec<String>,
    /// Project working directory
    pub workdir: PathBuf,
    /// Extra environment on top of the inherited one
    pub env: HashMap<String, String>,
}

impl BuildConfig {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            candidates: Vec::new(),
            workdir: workdir.into(),
            env: HashMap::new(),
        }
    }

    /// Default `pxt build` candidates for a MakeCode project.
    ///
    /// Order: bare `pxt`, the npm global shim on Windows (when `APPDATA` is
    /// set), then `npx`.
    pub fn pxt(workdir: impl Into<PathBuf>) -> Self {
        let mut config = Self::new(workdir).candidate("pxt build");

        if cfg!(windows) {
            if let Ok(app_data) = std::env::var("APPDATA") {
                if !app_data.is_empty() {
                    config = config.candidate(format!("\"{}\\npm\\pxt.cmd\" build", app_data));
                }
            }
        }

        config.candidate("npx -y pxt build")
    }

    pub fn candidate(mut self, command: impl Into<String>) -> Self {
        self.candidates.push(command.into());
        self
    }

    /// Put a command in front of the existing candidates.
    pub fn prefer(mut self, command: impl Into<String>) -> Self {
        self.candidates.insert(0, command.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }
}

/// Layout of the build output directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Directory the build tool writes into
    pub build_dir: PathBuf,
    /// Artifact file suffix, matched case-insensitively
    pub suffix: String,
    /// File name of the canonical artifact inside `build_dir`
    pub canonical_name: String,
}

impl ArtifactConfig {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
            suffix: ".hex".to_string(),
            canonical_name: "binary.hex".to_string(),
        }
    }

    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn canonical_name(mut self, name: impl Into<String>) -> Self {
        self.canonical_name = name.into();
        self
    }

    /// Full path of the canonical artifact.
    pub fn canonical_path(&self) -> PathBuf {
        self.build_dir.join(&self.canonical_name)
    }

    /// Whether a file name carries the artifact suffix.
    pub fn matches(&self, file_name: &str) -> bool {
        file_name
            .to_lowercase()
            .ends_with(&self.suffix.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pxt_candidates_order() {
        let config = BuildConfig::pxt("/project");
        assert_eq!(config.candidates.first().map(String::as_str), Some("pxt build"));
        assert_eq!(
            config.candidates.last().map(String::as_str),
            Some("npx -y pxt build")
        );
    }

    #[test]
    fn test_prefer_inserts_first() {
        let config = BuildConfig::new("/p").candidate("b").prefer("a");
        assert_eq!(config.candidates, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_artifact_suffix_case_insensitive() {
        let config = ArtifactConfig::new("/p/built");
        assert!(config.matches("binary.hex"));
        assert!(config.matches("OUT.HEX"));
        assert!(!config.matches("binary.hex.map"));
        assert_eq!(config.canonical_path(), PathBuf::from("/p/built/binary.hex"));
    }
}
