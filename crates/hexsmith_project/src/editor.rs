//! Read-modify-write access to the project manifest.
//!
//! Every structural change loads the document, mutates it and replaces the
//! file through a temporary sibling and a rename, so a concurrent reader sees
//! either the old or the new manifest, never a half-written one. Writers in
//! this process are serialized by an internal lock.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ProjectError, ProjectResult};
use crate::manifest::ProjectManifest;

/// Owner of all writes to one manifest file.
#[derive(Debug)]
pub struct ManifestEditor {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ManifestEditor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the manifest.
    pub async fn load(&self) -> ProjectResult<ProjectManifest> {
        debug!("Reading manifest from {:?}", self.path);
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProjectError::ManifestNotFound(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content).map_err(|e| ProjectError::InvalidManifest {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    async fn store(&self, manifest: &ProjectManifest) -> ProjectResult<()> {
        let mut content = serde_json::to_string_pretty(manifest)?;
        content.push('\n');

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "manifest.json".to_string());
        let tmp = self.path.with_file_name(format!(".{}.tmp", file_name));

        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!("Wrote manifest to {:?}", self.path);
        Ok(())
    }

    /// Apply `change` under the lock; write only if it reports a change.
    async fn update<F>(&self, change: F) -> ProjectResult<bool>
    where
        F: FnOnce(&mut ProjectManifest) -> bool,
    {
        let _guard = self.lock.lock().await;
        let mut manifest = self.load().await?;
        if !change(&mut manifest) {
            return Ok(false);
        }
        self.store(&manifest).await?;
        Ok(true)
    }

    /// Declare `file` as a project source if it is not already declared.
    pub async fn ensure_listed(&self, file: &str) -> ProjectResult<bool> {
        let changed = self.update(|m| m.ensure_listed(file)).await?;
        if changed {
            info!(file, "Added file to manifest");
        }
        Ok(changed)
    }

    /// Make `file` the single entry point. No write happens when it already is.
    pub async fn set_entry_point(&self, file: &str) -> ProjectResult<bool> {
        let changed = self.update(|m| m.set_entry_point(file)).await?;
        if changed {
            info!(file, "Entry point set to [{}]", file);
        }
        Ok(changed)
    }

    /// Declare `program` as the only program file and `entry` as the only
    /// entry point, in a single rewrite.
    pub async fn wire_program(&self, program: &str, entry: &str) -> ProjectResult<bool> {
        let changed = self.update(|m| m.wire_program(program, entry)).await?;
        if changed {
            info!(program, entry, "Wired program file into manifest");
        }
        Ok(changed)
    }

    /// The file a repair should edit, see [`ProjectManifest::editable_file`].
    pub async fn select_editable_file(&self) -> ProjectResult<Option<String>> {
        Ok(self.load().await?.editable_file().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    fn write_manifest(dir: &Path, json: &str) -> PathBuf {
        let path = dir.join("pxt.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let editor = ManifestEditor::new(dir.path().join("pxt.json"));
        assert!(matches!(
            editor.load().await,
            Err(ProjectError::ManifestNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let editor = ManifestEditor::new(write_manifest(dir.path(), "{ not json"));
        assert!(matches!(
            editor.ensure_listed("a.ts").await,
            Err(ProjectError::InvalidManifest { .. })
        ));
    }

    #[tokio::test]
    async fn test_ensure_listed_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), r#"{"name":"robot","files":["main.ts"]}"#);
        let editor = ManifestEditor::new(&path);

        assert!(editor.ensure_listed("ai.generated.ts").await.unwrap());
        assert!(!editor.ensure_listed("ai.generated.ts").await.unwrap());

        let m = editor.load().await.unwrap();
        assert_eq!(m.files(), vec!["main.ts", "ai.generated.ts"]);
        assert_eq!(m.get("name").unwrap(), "robot");
        assert!(!dir.path().join(".pxt.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_set_entry_point_skips_redundant_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), r#"{"files":[],"testFiles":["main.ts"]}"#);
        let old = SystemTime::now() - Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(old)
            .unwrap();

        let editor = ManifestEditor::new(&path);
        assert!(!editor.set_entry_point("main.ts").await.unwrap());
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), old);

        assert!(editor.set_entry_point("ai.generated.ts").await.unwrap());
        assert_eq!(
            editor.load().await.unwrap().entry_points(),
            vec!["ai.generated.ts"]
        );
    }

    #[tokio::test]
    async fn test_concurrent_edits_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), r#"{"files":[]}"#);
        let editor = Arc::new(ManifestEditor::new(&path));

        let mut handles = Vec::new();
        for i in 0..8 {
            let editor = editor.clone();
            handles.push(tokio::spawn(async move {
                editor.ensure_listed(&format!("f{}.ts", i)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(editor.load().await.unwrap().files().len(), 8);
    }

    #[tokio::test]
    async fn test_select_editable_file() {
        let dir = tempfile::tempdir().unwrap();
        let editor = ManifestEditor::new(write_manifest(
            dir.path(),
            r#"{"files":["README.md","main.ts"]}"#,
        ));
        assert_eq!(
            editor.select_editable_file().await.unwrap().as_deref(),
            Some("main.ts")
        );
    }
}
