//! Build command - Run one pipeline pass without the HTTP server.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use hexsmith_core::BuildRequest;

#[derive(Args)]
pub struct BuildArgs {
    /// Describe the program to generate
    #[arg(long)]
    pub prompt: Option<String>,

    /// Build this file's contents instead of generating
    #[arg(long, value_name = "FILE")]
    pub code_file: Option<PathBuf>,

    /// Retrieval query (defaults to the prompt)
    #[arg(long)]
    pub query: Option<String>,

    /// Force strict mode
    #[arg(long)]
    pub strict: bool,

    /// Skip example retrieval
    #[arg(long)]
    pub no_examples: bool,

    /// Write to this file instead of main.ts
    #[arg(long)]
    pub out_file: Option<String>,

    /// Leave main.ts alone and write ai.generated.ts
    #[arg(long)]
    pub keep_main: bool,

    /// Completion model
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub temperature: Option<f32>,

    /// Repair a failed build once
    #[arg(long)]
    pub auto_fix: bool,

    /// Attach a debug transcript
    #[arg(long)]
    pub debug: bool,

    /// Run the AI path even without a prompt or code
    #[arg(long)]
    pub ai: bool,
}

impl BuildArgs {
    fn request(self) -> Result<BuildRequest> {
        let code = match &self.code_file {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Cannot read {}", path.display()))?,
            ),
            None => None,
        };
        Ok(BuildRequest {
            ai: self.ai.then_some(true),
            prompt: self.prompt,
            query: self.query,
            code,
            overwrite_main: self.keep_main.then_some(false),
            out_file: self.out_file,
            strict: self.strict.then_some(true),
            no_examples: self.no_examples.then_some(true),
            model: self.model,
            temperature: self.temperature,
            auto_fix: self.auto_fix.then_some(true),
            debug: self.debug.then_some(true),
        })
    }
}

pub async fn execute(args: BuildArgs, project: Option<PathBuf>) -> Result<()> {
    let request = args.request()?;
    let project_dir = super::project_dir(project)?;
    let pipeline = super::pipeline(project_dir)?;

    info!(ai = request.is_ai_request(), "Running one-shot build");
    let outcome = pipeline.handle(request).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if outcome.success {
        Ok(())
    } else {
        anyhow::bail!("Build failure: {}", outcome.message)
    }
}
