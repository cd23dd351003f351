//! Project directory layout and source file access.

use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::editor::ManifestEditor;
use crate::error::{ProjectError, ProjectResult};

/// A MakeCode project on disk.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    /// Manifest file name.
    pub const MANIFEST_FILE: &'static str = "pxt.json";
    /// Build output directory, relative to the root.
    pub const BUILD_DIR: &'static str = "built";
    /// Primary program file.
    pub const MAIN_FILE: &'static str = "main.ts";
    /// Program file used when the primary one must not be overwritten.
    pub const GENERATED_FILE: &'static str = "ai.generated.ts";
    /// How many directories (including the start) root discovery inspects.
    pub const MAX_ASCENT: usize = 6;

    const BACKUP_PREFIX: &'static str = "main.ai.backup";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Check if a manifest exists at the given path.
    pub fn exists(path: impl AsRef<Path>) -> bool {
        path.as_ref().join(Self::MANIFEST_FILE).is_file()
    }

    /// Find the project root by walking up at most [`Self::MAX_ASCENT`]
    /// directories from `start`.
    pub fn find_root(start: impl AsRef<Path>) -> Option<PathBuf> {
        let mut current = start.as_ref().to_path_buf();
        for _ in 0..Self::MAX_ASCENT {
            if Self::exists(&current) {
                return Some(current);
            }
            if !current.pop() {
                return None;
            }
        }
        None
    }

    /// Discover the project from `start`, falling back to `start` itself.
    pub fn discover(start: impl AsRef<Path>) -> Self {
        let start = start.as_ref();
        match Self::find_root(start) {
            Some(root) => Self::new(root),
            None => {
                warn!(start = %start.display(), "No {} found, using start directory", Self::MANIFEST_FILE);
                Self::new(start)
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(Self::MANIFEST_FILE)
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.join(Self::BUILD_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("tools").join("logs")
    }

    /// An editor bound to this project's manifest.
    pub fn editor(&self) -> ManifestEditor {
        ManifestEditor::new(self.manifest_path())
    }

    /// Resolve a project-relative file name, rejecting anything that would
    /// leave the project directory.
    pub fn source_path(&self, name: &str) -> ProjectResult<PathBuf> {
        let relative = Path::new(name);
        let plain = !name.trim().is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !plain {
            return Err(ProjectError::InvalidFileName(name.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Read a project file; `None` if it does not exist.
    pub async fn read_source(&self, name: &str) -> ProjectResult<Option<String>> {
        let path = self.source_path(name)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_source(&self, name: &str, contents: &str) -> ProjectResult<PathBuf> {
        let path = self.source_path(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, contents).await?;
        debug!(file = name, bytes = contents.len(), "Wrote source file");
        Ok(path)
    }

    /// Existing backups of the primary program file.
    pub async fn backups(&self) -> ProjectResult<Vec<PathBuf>> {
        let mut backups = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(backups),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(Self::BACKUP_PREFIX)
                && name.ends_with(".ts")
                && entry.file_type().await?.is_file()
            {
                backups.push(entry.path());
            }
        }
        backups.sort();
        Ok(backups)
    }

    /// Copy `main.ts` to a timestamped backup unless a backup already exists.
    ///
    /// Returns the new backup path, or `None` when nothing was written.
    pub async fn backup_main_once(&self) -> ProjectResult<Option<PathBuf>> {
        let main = self.root.join(Self::MAIN_FILE);
        if !tokio::fs::try_exists(&main).await? || !self.backups().await?.is_empty() {
            return Ok(None);
        }
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let backup = self
            .root
            .join(format!("{}-{}.ts", Self::BACKUP_PREFIX, stamp));
        tokio::fs::copy(&main, &backup).await?;
        info!(backup = %backup.display(), "Backed up {}", Self::MAIN_FILE);
        Ok(Some(backup))
    }

    /// Write a timestamped transcript into the logs directory.
    pub async fn write_log(&self, prefix: &str, content: &str) -> ProjectResult<PathBuf> {
        let dir = self.logs_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
        let path = dir.join(format!("{}-{}.log", prefix, stamp));
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_root_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pxt.json"), "{}").unwrap();
        let nested = dir.path().join("tools").join("dist");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(ProjectLayout::find_root(&nested), Some(dir.path().to_path_buf()));
    }

    #[test]
    fn test_find_root_gives_up_after_six_levels() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pxt.json"), "{}").unwrap();

        let five_deep = dir.path().join("a/b/c/d/e");
        std::fs::create_dir_all(&five_deep).unwrap();
        assert!(ProjectLayout::find_root(&five_deep).is_some());

        let six_deep = five_deep.join("f");
        std::fs::create_dir_all(&six_deep).unwrap();
        assert!(ProjectLayout::find_root(&six_deep).is_none());
        assert_eq!(ProjectLayout::discover(&six_deep).root(), six_deep.as_path());
    }

    #[test]
    fn test_source_path_rejects_escape() {
        let layout = ProjectLayout::new("/project");
        assert!(layout.source_path("main.ts").is_ok());
        assert!(layout.source_path("src/robot.ts").is_ok());
        assert!(layout.source_path("../secret.ts").is_err());
        assert!(layout.source_path("/etc/passwd").is_err());
        assert!(layout.source_path("").is_err());
    }

    #[tokio::test]
    async fn test_backup_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        assert!(layout.backup_main_once().await.unwrap().is_none());

        layout.write_source("main.ts", "basic.showString(\"hi\")").await.unwrap();
        let backup = layout.backup_main_once().await.unwrap().unwrap();
        assert_eq!(
            std::fs::read_to_string(&backup).unwrap(),
            "basic.showString(\"hi\")"
        );

        layout.write_source("main.ts", "zoombit.brake()").await.unwrap();
        assert!(layout.backup_main_once().await.unwrap().is_none());
        assert_eq!(layout.backups().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_read_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        assert!(layout.read_source("main.ts").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_log() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        let path = layout.write_log("ai-build", "transcript").await.unwrap();
        assert!(path.starts_with(dir.path().join("tools/logs")));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("ai-build-"));
    }
}
