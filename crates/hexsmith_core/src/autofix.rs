//! Single repair cycle for a failed build.
//!
//! An [`AutoFixAttempt`] is consumed by [`AutoFixAttempt::repair`], so a
//! request can repair at most once. Every failure inside the cycle maps to
//! [`CoreError::AutoFixExhausted`].

use hexsmith_chat::RepairClient;
use hexsmith_project::{ManifestEditor, ProjectLayout};
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};
use crate::format::SourceFormatter;

/// Owns the repair capability.
#[derive(Clone)]
pub struct AutoFixCoordinator {
    repair: RepairClient,
    formatter: SourceFormatter,
}

impl AutoFixCoordinator {
    pub fn new(repair: RepairClient, formatter: SourceFormatter) -> Self {
        Self { repair, formatter }
    }

    /// Begin the one repair attempt of a request.
    pub fn attempt<'a>(
        &'a self,
        layout: &'a ProjectLayout,
        editor: &'a ManifestEditor,
    ) -> AutoFixAttempt<'a> {
        AutoFixAttempt {
            coordinator: self,
            layout,
            editor,
        }
    }
}

/// A pending repair.
pub struct AutoFixAttempt<'a> {
    coordinator: &'a AutoFixCoordinator,
    layout: &'a ProjectLayout,
    editor: &'a ManifestEditor,
}

impl AutoFixAttempt<'_> {
    /// Repair `target` in place and declare it in the manifest.
    ///
    /// The file on disk is preferred; `fallback` is used when it is missing.
    /// Returns the code written.
    pub async fn repair(
        self,
        target: &str,
        fallback: Option<&str>,
        diagnostics: &str,
    ) -> CoreResult<String> {
        info!(target, "[AUTOFIX] Attempting repair");
        let current = match self.layout.read_source(target).await {
            Ok(Some(code)) => code,
            Ok(None) => fallback
                .map(str::to_string)
                .ok_or_else(|| exhausted(format!("{} does not exist", target)))?,
            Err(e) => return Err(exhausted(e)),
        };
        if current.trim().is_empty() {
            return Err(exhausted(format!("{} is empty", target)));
        }

        let fixed = self
            .coordinator
            .repair
            .repair(target, &current, diagnostics)
            .await
            .map_err(exhausted)?;
        let fixed = self.coordinator.formatter.format(&fixed).await;

        self.layout
            .write_source(target, &fixed)
            .await
            .map_err(exhausted)?;
        self.editor.ensure_listed(target).await.map_err(exhausted)?;

        info!(target, bytes = fixed.len(), "[AUTOFIX] Wrote repaired source");
        Ok(fixed)
    }
}

fn exhausted(reason: impl std::fmt::Display) -> CoreError {
    let reason = reason.to_string();
    warn!("[AUTOFIX] {}", reason);
    CoreError::AutoFixExhausted(reason)
}
