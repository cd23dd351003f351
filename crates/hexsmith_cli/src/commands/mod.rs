//! CLI command definitions.
//!
//! Both subcommands assemble the same pipeline from the environment; `serve`
//! puts it behind the HTTP gateway, `build` runs it once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use hexsmith_chat::{CodeGenerator, KnowledgeClient, OpenAiClient};
use hexsmith_core::{BuildPipeline, Settings};
use hexsmith_project::ProjectLayout;
use hexsmith_runner::ShellRunner;

pub mod build;
pub mod serve;

/// hexsmith - prompt-to-firmware build server for MakeCode robots
#[derive(Parser)]
#[command(name = "hexsmith")]
#[command(version, about = "hexsmith - prompt-to-firmware build server for MakeCode robots")]
#[command(long_about = r#"
hexsmith turns a prompt or a literal program into a compiled .hex file for a
MakeCode project, repairing failed builds once when asked to.

COMMANDS:
  serve   → Run the HTTP gateway (POST /build, POST /ai-build, GET /events, ...)
  build   → Run one build and print the outcome as JSON

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Build failure
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Project directory (defaults to the nearest directory holding pxt.json)
    #[arg(short, long, global = true, env = "HEXSMITH_PROJECT")]
    pub project: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP gateway
    Serve(serve::ServeArgs),

    /// Build once and print the outcome
    Build(build::BuildArgs),
}

/// Resolve the project directory from the flag or the working directory.
pub fn project_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        if !ProjectLayout::exists(&dir) {
            anyhow::bail!("Invalid argument: no pxt.json in {}", dir.display());
        }
        return Ok(dir);
    }
    let cwd = std::env::current_dir().context("Cannot read working directory")?;
    Ok(ProjectLayout::discover(&cwd).root().to_path_buf())
}

/// Load `.env` from the project directory and its parent.
///
/// Variables already set in the process win.
pub fn load_dotenv(project_dir: &Path) {
    let candidates = [Some(project_dir), project_dir.parent()];
    for dir in candidates.into_iter().flatten() {
        let path = dir.join(".env");
        if !path.is_file() {
            continue;
        }
        match dotenvy::from_path(&path) {
            Ok(()) => info!(path = %path.display(), "Loaded environment file"),
            Err(e) => warn!(path = %path.display(), error = %e, "Ignoring environment file"),
        }
    }
}

/// Assemble the pipeline for a project from the environment.
pub fn pipeline(project_dir: PathBuf) -> Result<BuildPipeline> {
    load_dotenv(&project_dir);
    let settings = Settings::from_env(project_dir);

    let knowledge = KnowledgeClient::new(settings.knowledge_config());
    let mut generator = CodeGenerator::new()
        .context("Failed to compile generation rules")?
        .with_knowledge(Arc::new(knowledge));

    match OpenAiClient::from_env() {
        Ok(client) => {
            info!("Completion service configured");
            generator = generator.with_completion(Arc::new(client));
        }
        Err(e) => warn!("{}; AI builds fall back to rules and plain builds", e),
    }

    info!(
        project = %settings.project_dir.display(),
        auto_fix = settings.auto_fix,
        format = settings.format_sources,
        "Pipeline ready"
    );
    Ok(BuildPipeline::new(
        settings,
        Arc::new(ShellRunner::default()),
        generator,
    ))
}
