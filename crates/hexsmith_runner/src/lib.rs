//! # hexsmith_runner
//!
//! Build tool execution for hexsmith.
//!
//! This crate runs the external build tool for a project and tidies up
//! what it leaves behind.
//!
//! # Features
//!
//! - **Candidate cascade**: try `pxt build`, the npm shim, then `npx` until one is recognized
//! - **Shell runner**: runs through the platform shell and captures stdout/stderr
//! - **Artifact normalization**: exactly one canonical artifact after every build
//! - **Dry-Run Mode**: log commands without executing them
//! - **Mock Runner**: scripted responses for tests without the real tool installed
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hexsmith_runner::{
//!     ArtifactConfig, ArtifactNormalizer, BuildConfig, BuildExecutor, ShellRunner,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = BuildExecutor::new(Arc::new(ShellRunner::default()));
//!     let result = executor.run(&BuildConfig::pxt("./project")).await?;
//!     println!("Built with `{}` in {}ms", result.command, result.duration_ms);
//!
//!     let normalizer = ArtifactNormalizer::new(ArtifactConfig::new("./project/built"));
//!     if let Some(artifact) = normalizer.normalize().await? {
//!         println!("Artifact: {} ({} bytes)", artifact.path.display(), artifact.size);
//!     }
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod config;
pub mod error;
pub mod executor;
pub mod mock;
pub mod runner;
pub mod shell;

pub use artifact::{Artifact, ArtifactNormalizer, ArtifactSet};
pub use config::{ArtifactConfig, BuildConfig};
pub use error::{RunnerError, RunnerResult};
pub use executor::BuildExecutor;
pub use mock::{CapturedCall, MockResponse, MockRunner};
pub use runner::{CommandRunner, ExecutionResult};
pub use shell::{LogHandler, LogLine, LogStream, ShellRunner, ShellRunnerOptions};
