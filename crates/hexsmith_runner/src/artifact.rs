//! Build output normalization.
//!
//! The build tool may leave several artifacts behind (older builds, files
//! named after the project). After normalization exactly one artifact
//! remains, at the canonical path, and it is the most recently modified one.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ArtifactConfig;
use crate::error::RunnerResult;

/// One artifact file in the build directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// All artifact-suffixed files currently in the build directory,
/// newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactSet {
    pub entries: Vec<Artifact>,
}

impl ArtifactSet {
    pub fn latest(&self) -> Option<&Artifact> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.entries.iter()
    }
}

/// Canonicalizes the build output directory.
#[derive(Debug, Clone)]
pub struct ArtifactNormalizer {
    config: ArtifactConfig,
}

impl ArtifactNormalizer {
    pub fn new(config: ArtifactConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ArtifactConfig {
        &self.config
    }

    pub fn build_dir(&self) -> &Path {
        &self.config.build_dir
    }

    pub fn canonical_path(&self) -> PathBuf {
        self.config.canonical_path()
    }

    /// Names of every entry in the build directory, for diagnostics.
    ///
    /// A missing directory yields an empty listing.
    pub async fn listing(&self) -> Vec<String> {
        let mut names = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.config.build_dir).await else {
            return names;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        names
    }

    /// Collect artifact-suffixed files, newest first.
    ///
    /// On equal modification times the canonical file sorts first, so a
    /// repeated normalization never swaps it for an identical sibling.
    pub async fn scan(&self) -> RunnerResult<ArtifactSet> {
        let mut entries = match tokio::fs::read_dir(&self.config.build_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ArtifactSet::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !self.config.matches(&name) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push(Artifact {
                path: entry.path(),
                size: metadata.len(),
                modified: DateTime::<Utc>::from(modified),
            });
        }

        let canonical = self.canonical_path();
        found.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| (b.path == canonical).cmp(&(a.path == canonical)))
        });

        Ok(ArtifactSet { entries: found })
    }

    /// The artifact a download should serve: the canonical file if present,
    /// otherwise the newest artifact.
    pub async fn current(&self) -> RunnerResult<Option<Artifact>> {
        let canonical = self.canonical_path();
        match tokio::fs::metadata(&canonical).await {
            Ok(metadata) if metadata.is_file() => {
                let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                return Ok(Some(Artifact {
                    path: canonical,
                    size: metadata.len(),
                    modified: DateTime::<Utc>::from(modified),
                }));
            }
            _ => {}
        }
        Ok(self.scan().await?.latest().cloned())
    }

    /// Keep only the newest artifact, at the canonical path.
    ///
    /// Returns `None` when the directory holds no artifact at all; that is
    /// "not built yet", not an error. Running it again with only the
    /// canonical file present changes nothing.
    pub async fn normalize(&self) -> RunnerResult<Option<Artifact>> {
        let set = self.scan().await?;
        let Some(latest) = set.latest().cloned() else {
            debug!(dir = %self.config.build_dir.display(), "No artifact to normalize");
            return Ok(None);
        };

        for stale in set.iter().skip(1) {
            match tokio::fs::remove_file(&stale.path).await {
                Ok(()) => debug!(path = %stale.path.display(), "Removed stale artifact"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let canonical = self.canonical_path();
        if latest.path != canonical {
            if let Err(e) = tokio::fs::rename(&latest.path, &canonical).await {
                warn!(
                    from = %latest.path.display(),
                    to = %canonical.display(),
                    "Rename failed ({}), falling back to copy",
                    e
                );
                tokio::fs::copy(&latest.path, &canonical).await?;
                tokio::fs::remove_file(&latest.path).await?;
            }
            info!(from = %latest.path.display(), to = %canonical.display(), "Promoted artifact");
        }

        let metadata = tokio::fs::metadata(&canonical).await?;
        Ok(Some(Artifact {
            path: canonical,
            size: metadata.len(),
            modified: latest.modified,
        }))
    }
}
