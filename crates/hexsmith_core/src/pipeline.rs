//! Build pipeline.
//!
//! A request either builds the current sources, or generates a program,
//! wires it into the manifest and builds that. Failed builds may be repaired
//! once. Builds (together with the source and manifest writes and the
//! repair that precede them) are serialized by one async lock; generation
//! runs outside it. Every request ends with exactly one terminal event.

use std::sync::Arc;
use std::time::Instant;

use hexsmith_chat::{
    ChatError, CodeGenerator, Generation, GenerationTrace, RepairClient,
};
use hexsmith_project::{ManifestEditor, ProjectLayout};
use hexsmith_runner::{
    Artifact, ArtifactConfig, ArtifactNormalizer, BuildConfig, BuildExecutor, CommandRunner,
};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::autofix::AutoFixCoordinator;
use crate::config::Settings;
use crate::error::{CoreError, CoreResult};
use crate::events::{
    EventBroadcaster, AI_BUILD_FAILED, AI_BUILD_SUCCEEDED, BUILD_FAILED, BUILD_SUCCEEDED,
};
use crate::format::SourceFormatter;
use crate::request::{BuildOutcome, BuildRequest};

const PREVIEW_LEN: usize = 2000;

/// Which endpoint family a run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Build,
    AiBuild,
}

impl Flow {
    fn label(self) -> &'static str {
        match self {
            Flow::Build => "Build",
            Flow::AiBuild => "AI build",
        }
    }

    /// Terminal event name for an outcome of this flow.
    pub fn event(self, success: bool) -> &'static str {
        match (self, success) {
            (Flow::Build, true) => BUILD_SUCCEEDED,
            (Flow::Build, false) => BUILD_FAILED,
            (Flow::AiBuild, true) => AI_BUILD_SUCCEEDED,
            (Flow::AiBuild, false) => AI_BUILD_FAILED,
        }
    }
}

/// Why an AI request fell back to building the current sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Degradation {
    NoCredential,
    RemoteFailed,
    EmptyCode,
}

impl Degradation {
    fn from_error(err: &ChatError) -> Self {
        match err {
            ChatError::GenerationUnavailable | ChatError::LlmNotConfigured => Self::NoCredential,
            ChatError::EmptyGeneration => Self::EmptyCode,
            _ => Self::RemoteFailed,
        }
    }

    fn note(self) -> &'static str {
        match self {
            Self::NoCredential => {
                "AI disabled (no OPENAI_API_KEY). Performing plain build of current sources."
            }
            Self::RemoteFailed => "AI unavailable. Performing plain build of current sources.",
            Self::EmptyCode => "AI returned empty code. Performing plain build of current sources.",
        }
    }

    fn phase(self) -> (&'static str, &'static str) {
        match self {
            Self::NoCredential => ("ai-disabled", "no-api-key"),
            Self::RemoteFailed => ("ai-fallback", "openai-failed"),
            Self::EmptyCode => ("ai-fallback", "empty-code"),
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Self::NoCredential => "AI disabled",
            Self::RemoteFailed => "AI unavailable",
            Self::EmptyCode => "AI empty code",
        }
    }
}

/// Position of a build within a request, for outcome messages.
#[derive(Debug, Clone, Copy)]
enum Stage {
    First,
    AfterFix,
    Degraded(Degradation),
}

/// Orchestrates generation, manifest wiring, builds and repairs.
pub struct BuildPipeline {
    settings: Settings,
    layout: ProjectLayout,
    editor: ManifestEditor,
    executor: BuildExecutor,
    build: BuildConfig,
    normalizer: ArtifactNormalizer,
    generator: CodeGenerator,
    autofix: Option<AutoFixCoordinator>,
    formatter: SourceFormatter,
    events: EventBroadcaster,
    lock: Mutex<()>,
}

impl BuildPipeline {
    pub fn new(settings: Settings, runner: Arc<dyn CommandRunner>, generator: CodeGenerator) -> Self {
        let layout = ProjectLayout::new(&settings.project_dir);
        let formatter = if settings.format_sources {
            SourceFormatter::prettier()
        } else {
            SourceFormatter::disabled()
        };
        let autofix = generator
            .completion()
            .map(|client| AutoFixCoordinator::new(RepairClient::new(client), formatter.clone()));

        Self {
            editor: layout.editor(),
            executor: BuildExecutor::new(runner),
            build: BuildConfig::pxt(layout.root()),
            normalizer: ArtifactNormalizer::new(ArtifactConfig::new(layout.build_dir())),
            layout,
            settings,
            generator,
            autofix,
            formatter,
            events: EventBroadcaster::new(),
            lock: Mutex::new(()),
        }
    }

    pub fn with_build_config(mut self, build: BuildConfig) -> Self {
        self.build = build;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn normalizer(&self) -> &ArtifactNormalizer {
        &self.normalizer
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// Dispatch a request to the plain or the AI flow.
    pub async fn handle(&self, request: BuildRequest) -> BuildOutcome {
        let ai = request.is_ai_request();
        if self.wants_debug(&request) {
            info!(ai, fields = ?request.present_fields(), "[BUILD] Dispatching request");
            self.events.debug_phase(
                "has-ai-keys",
                json!({ "hasAiKeys": ai, "keys": request.present_fields() }),
            );
        }
        if ai {
            self.run_ai_build(&request).await
        } else {
            self.run_build(&request).await
        }
    }

    /// Build the current sources.
    pub async fn run_build(&self, request: &BuildRequest) -> BuildOutcome {
        let started = Instant::now();
        let _guard = self.lock.lock().await;

        let result = self.compile().await;
        let outcome = match (&result, self.repairer(request)) {
            (Err(err), Some(autofix)) if err.is_repairable() => {
                self.events.debug_phase(
                    "autofix-start",
                    json!({ "from": "build", "reason": "pxt-failed" }),
                );
                match self.editable_target().await {
                    Some(target) => {
                        self.repair_and_rebuild(autofix, Flow::Build, &target, None, err)
                            .await
                            .0
                    }
                    None => {
                        self.events.debug_phase(
                            "autofix-error",
                            json!({ "error": "no editable source file" }),
                        );
                        conclude(Flow::Build, Stage::First, result.as_ref())
                    }
                }
            }
            _ => conclude(Flow::Build, Stage::First, result.as_ref()),
        };

        self.finish(Flow::Build, outcome, started)
    }

    /// Generate a program, wire it in and build it.
    pub async fn run_ai_build(&self, request: &BuildRequest) -> BuildOutcome {
        let started = Instant::now();
        let debug = self.wants_debug(request);
        let mut trace = GenerationTrace::default();

        let generation = self
            .generator
            .generate(&request.generation(), &mut trace)
            .await;
        if debug {
            self.broadcast_trace(&trace);
        }

        let outcome = match generation {
            Ok(generation) => self.build_generated(request, generation).await,
            Err(err) if err.is_degradable() => self.build_degraded(Degradation::from_error(&err)).await,
            Err(err) => {
                error!(error = %err, "[AI-BUILD] Generation failed");
                BuildOutcome::failed("AI build failed", &CoreError::from(err))
            }
        };

        let outcome = if debug {
            let report = self.write_debug_log(request, &trace, &outcome).await;
            outcome.debug(Some(report))
        } else {
            outcome
        };
        self.finish(Flow::AiBuild, outcome, started)
    }

    async fn build_generated(&self, request: &BuildRequest, generation: Generation) -> BuildOutcome {
        let out_file = request.output_file();
        if let Err(e) = self.layout.source_path(&out_file) {
            return BuildOutcome::failed("AI build failed", &CoreError::from(e));
        }

        let code = self.formatter.format(&generation.code).await;
        info!(
            tier = %generation.tier,
            file = %out_file,
            "\n[AI] Generated TypeScript (preview):\n{}",
            code
        );
        self.events.debug_phase(
            "ai-code",
            json!({ "snippet": hexsmith_chat::truncate(&code, PREVIEW_LEN), "tier": generation.tier }),
        );

        let _guard = self.lock.lock().await;
        if let Err(e) = self.install(request, &out_file, &code).await {
            error!(error = %e, "[AI-BUILD] Could not install generated source");
            return BuildOutcome::failed("AI build failed", &e).generated(&out_file, &code);
        }

        let result = self.compile().await;
        match (&result, self.repairer(request)) {
            (Err(err), Some(autofix)) if err.is_repairable() => {
                self.events.debug_phase(
                    "autofix-start",
                    json!({ "from": "ai-build", "reason": "pxt-failed" }),
                );
                let (outcome, fixed) = self
                    .repair_and_rebuild(autofix, Flow::AiBuild, &out_file, Some(&code), err)
                    .await;
                let source = fixed.unwrap_or_else(|| code.clone());
                outcome.generated(&out_file, source)
            }
            _ => conclude(Flow::AiBuild, Stage::First, result.as_ref()).generated(&out_file, &code),
        }
    }

    async fn build_degraded(&self, reason: Degradation) -> BuildOutcome {
        warn!("[AI-BUILD] {}", reason.note());
        let (phase, why) = reason.phase();
        self.events.debug_phase(phase, json!({ "reason": why }));

        let _guard = self.lock.lock().await;
        let result = self.compile().await;
        conclude(Flow::AiBuild, Stage::Degraded(reason), result.as_ref()).ai_disabled()
    }

    /// Write the generated file, back up the primary program and point the
    /// manifest at the output file.
    async fn install(&self, request: &BuildRequest, out_file: &str, code: &str) -> CoreResult<()> {
        if request.overwrites_main() {
            if let Err(e) = self.layout.backup_main_once().await {
                warn!(error = %e, "[AI-BUILD] Backup of {} failed", ProjectLayout::MAIN_FILE);
            }
        }
        self.layout.write_source(out_file, code).await?;
        self.editor
            .wire_program(request.program_file(), out_file)
            .await?;
        Ok(())
    }

    /// Run the build tool and normalize its output.
    async fn compile(&self) -> CoreResult<Artifact> {
        let result = self.executor.run(&self.build).await?;
        match self.normalizer.normalize().await? {
            Some(artifact) => {
                info!(
                    artifact = %artifact.path.display(),
                    size = artifact.size,
                    "[BUILD] HEX ready"
                );
                Ok(artifact)
            }
            None => {
                let listing = self.normalizer.listing().await;
                error!(
                    expected = %self.normalizer.canonical_path().display(),
                    ?listing,
                    "[BUILD] Succeeded but no HEX was produced"
                );
                Err(CoreError::ArtifactMissing {
                    expected: self.normalizer.canonical_path(),
                    listing,
                    stdout: result.stdout,
                    stderr: result.stderr,
                })
            }
        }
    }

    /// The one repair cycle: fix `target`, then rebuild once.
    ///
    /// Returns the outcome and, when the repair wrote a file, its code.
    async fn repair_and_rebuild(
        &self,
        autofix: &AutoFixCoordinator,
        flow: Flow,
        target: &str,
        fallback: Option<&str>,
        failure: &CoreError,
    ) -> (BuildOutcome, Option<String>) {
        let repaired = autofix
            .attempt(&self.layout, &self.editor)
            .repair(target, fallback, &failure.repair_input())
            .await;

        match repaired {
            Ok(fixed) => {
                let rebuilt = self.compile().await;
                let outcome = conclude(flow, Stage::AfterFix, rebuilt.as_ref()).auto_fixed(target);
                (outcome, Some(fixed))
            }
            Err(e) => {
                self.events
                    .debug_phase("autofix-error", json!({ "error": e.to_string() }));
                let mut outcome = conclude(flow, Stage::First, Err(failure)).auto_fixed(target);
                if let Some(diagnostics) = outcome.diagnostics.as_mut() {
                    diagnostics.error = format!("{}; {}", diagnostics.error, e);
                }
                (outcome, None)
            }
        }
    }

    /// First editable source from the manifest.
    async fn editable_target(&self) -> Option<String> {
        match self.editor.select_editable_file().await {
            Ok(target) => target,
            Err(e) => {
                warn!(error = %e, "[AUTOFIX] Could not select a file to repair");
                None
            }
        }
    }

    /// The coordinator, when this request may be repaired.
    fn repairer(&self, request: &BuildRequest) -> Option<&AutoFixCoordinator> {
        if request.wants_auto_fix() || self.settings.auto_fix {
            self.autofix.as_ref()
        } else {
            None
        }
    }

    fn wants_debug(&self, request: &BuildRequest) -> bool {
        request.wants_debug() || self.settings.debug
    }

    fn broadcast_trace(&self, trace: &GenerationTrace) {
        if let Some(transcript) = &trace.retrieval {
            self.events.debug_phase(
                "retrieval",
                json!({
                    "stdout": hexsmith_chat::truncate(&transcript.stdout, PREVIEW_LEN),
                    "stderr": hexsmith_chat::truncate(&transcript.stderr, PREVIEW_LEN),
                    "timedOut": transcript.timed_out,
                    "error": trace.retrieval_error,
                }),
            );
        }
        if let Some(prompt) = &trace.prompt {
            self.events
                .debug_phase("prompt", json!({ "prompt": prompt, "strict": trace.strict }));
        }
        for completion in &trace.completions {
            self.events.debug_phase(
                "completion",
                json!({ "status": completion.status, "snippet": completion.snippet }),
            );
        }
    }

    /// Write the transcript file and return the response's debug block.
    async fn write_debug_log(
        &self,
        request: &BuildRequest,
        trace: &GenerationTrace,
        outcome: &BuildOutcome,
    ) -> Value {
        let retrieval = trace.retrieval.as_ref();
        let text = [
            "=== AI Build Debug ===".to_string(),
            format!(
                "Model: {}",
                request.model.as_deref().unwrap_or("(client default)")
            ),
            format!("Strict: {}", trace.strict),
            format!("Prompt:\n{}", trace.prompt.as_deref().unwrap_or("")),
            format!(
                "\n--- Retrieval stdout ---\n{}",
                retrieval.map(|t| t.stdout.as_str()).unwrap_or("")
            ),
            format!(
                "\n--- Retrieval stderr ---\n{}",
                retrieval.map(|t| t.stderr.as_str()).unwrap_or("")
            ),
            format!(
                "\n--- Completions ---\n{}",
                serde_json::to_string_pretty(&trace.completions).unwrap_or_default()
            ),
            format!(
                "\n--- Generated Code ---\n{}",
                outcome.generated_source.as_deref().unwrap_or("")
            ),
        ]
        .join("\n");

        let log_file = match self.layout.write_log("ai-build", &text).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "[DEBUG] Could not write debug log");
                None
            }
        };

        json!({
            "prompt": trace.prompt,
            "strict": trace.strict,
            "retrieval": trace.retrieval,
            "retrievalError": trace.retrieval_error,
            "violations": trace.violations,
            "logFile": log_file,
        })
    }

    fn finish(&self, flow: Flow, outcome: BuildOutcome, started: Instant) -> BuildOutcome {
        let outcome = outcome.duration_ms(started.elapsed().as_millis() as u64);
        if outcome.success {
            info!(message = %outcome.message, duration_ms = outcome.duration_ms, "[BUILD] Done");
        } else {
            error!(message = %outcome.message, duration_ms = outcome.duration_ms, "[BUILD] Done");
        }
        let delivered = self
            .events
            .broadcast(flow.event(outcome.success), outcome.to_json());
        info!(event = flow.event(outcome.success), listeners = delivered, "[EVENTS] Broadcast");
        outcome
    }
}

/// Map a build result to its outcome and message.
fn conclude(flow: Flow, stage: Stage, result: Result<&Artifact, &CoreError>) -> BuildOutcome {
    let label = match stage {
        Stage::Degraded(_) => Flow::Build.label(),
        _ => flow.label(),
    };
    match (result, stage) {
        (Ok(artifact), Stage::Degraded(reason)) => BuildOutcome::succeeded(reason.note(), artifact),
        (Ok(artifact), Stage::AfterFix) => {
            BuildOutcome::succeeded(format!("{} succeeded (after auto-fix)", label), artifact)
        }
        (Ok(artifact), Stage::First) => {
            BuildOutcome::succeeded(format!("{} succeeded", label), artifact)
        }
        (Err(err), stage) => {
            let missing = matches!(err, CoreError::ArtifactMissing { .. });
            let message = match (missing, stage) {
                (true, Stage::First) => format!("{} completed but HEX not found", label),
                (true, Stage::AfterFix) if flow == Flow::Build => {
                    format!("{} succeeded but HEX not found (after auto-fix)", label)
                }
                (true, Stage::AfterFix) => {
                    format!("{} completed but HEX not found (after auto-fix)", label)
                }
                (true, Stage::Degraded(r)) => {
                    format!("{} completed but HEX not found ({})", label, r.tag())
                }
                (false, Stage::First) => format!("{} failed", label),
                (false, Stage::AfterFix) => format!("{} failed (after auto-fix attempt)", label),
                (false, Stage::Degraded(r)) => format!("{} failed ({})", label, r.tag()),
            };
            BuildOutcome::failed(message, err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing() -> CoreError {
        CoreError::ArtifactMissing {
            expected: "/p/built/binary.hex".into(),
            listing: vec![],
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            conclude(Flow::Build, Stage::First, Err(&missing())).message,
            "Build completed but HEX not found"
        );
        assert_eq!(
            conclude(Flow::AiBuild, Stage::AfterFix, Err(&missing())).message,
            "AI build completed but HEX not found (after auto-fix)"
        );
        assert_eq!(
            conclude(
                Flow::AiBuild,
                Stage::Degraded(Degradation::EmptyCode),
                Err(&CoreError::AutoFixExhausted("x".into()))
            )
            .message,
            "Build failed (AI empty code)"
        );
    }

    #[test]
    fn test_degradation_mapping() {
        assert_eq!(
            Degradation::from_error(&ChatError::GenerationUnavailable),
            Degradation::NoCredential
        );
        assert_eq!(
            Degradation::from_error(&ChatError::LlmError("boom".into())),
            Degradation::RemoteFailed
        );
        assert_eq!(Degradation::EmptyCode.phase(), ("ai-fallback", "empty-code"));
    }

    #[test]
    fn test_flow_events() {
        assert_eq!(Flow::Build.event(true), BUILD_SUCCEEDED);
        assert_eq!(Flow::AiBuild.event(false), AI_BUILD_FAILED);
    }
}
