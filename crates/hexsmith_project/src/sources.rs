//! Readback of the project's TypeScript sources.

use serde::{Deserialize, Serialize};

use crate::error::{ProjectError, ProjectResult};
use crate::layout::ProjectLayout;

/// One source file included in a readback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub size: u64,
}

/// All declared sources concatenated, each preceded by a `// file:` marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceBundle {
    pub code: String,
    pub files: Vec<SourceFile>,
}

impl SourceBundle {
    /// Collect the declared TypeScript sources of a project.
    ///
    /// Declared files missing on disk are skipped. Returns `None` when the
    /// manifest is absent or no source could be read.
    pub async fn read(layout: &ProjectLayout) -> ProjectResult<Option<Self>> {
        let manifest = match layout.editor().load().await {
            Ok(manifest) => manifest,
            Err(ProjectError::ManifestNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut parts = Vec::new();
        let mut files = Vec::new();
        for name in manifest.source_files() {
            let Ok(path) = layout.source_path(name) else {
                continue;
            };
            let text = match tokio::fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            files.push(SourceFile {
                name: name.to_string(),
                size: text.len() as u64,
            });
            parts.push(format!("// file: {}\n{}\n", name, text));
        }

        if parts.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self {
            code: parts.join("\n"),
            files,
        }))
    }
}
