//! # hexsmith_core
//!
//! Build pipeline for a MakeCode robot project.
//!
//! This crate ties the build executor, the manifest editor and the code
//! generator together into the two request flows served over HTTP and the
//! command line.
//!
//! # Architecture
//!
//! - **Pipeline**: dispatches a request to a plain or an AI build
//! - **Auto-fix**: repairs a failed build once and rebuilds once
//! - **Events**: fans terminal outcomes and debug phases out to listeners
//! - **Format**: optional prettier pass over generated source
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hexsmith_chat::CodeGenerator;
//! use hexsmith_core::{BuildPipeline, BuildRequest, Settings};
//! use hexsmith_runner::ShellRunner;
//!
//! let settings = Settings::from_env("/work/pxt-zoombit");
//! let pipeline = BuildPipeline::new(settings, Arc::new(ShellRunner::default()), CodeGenerator::new()?);
//!
//! let outcome = pipeline.handle(BuildRequest::from_body(br#"{"prompt": "turn on the headlight"}"#)).await;
//! println!("{}", outcome.message);
//! ```

pub mod autofix;
pub mod config;
pub mod error;
pub mod events;
pub mod format;
pub mod pipeline;
pub mod request;

// Re-export main types for convenience
pub use autofix::{AutoFixAttempt, AutoFixCoordinator};
pub use config::Settings;
pub use error::{CoreError, CoreResult};
pub use events::{
    EventBroadcaster, PipelineEvent, Subscription, AI_BUILD_FAILED, AI_BUILD_SUCCEEDED, AI_DEBUG,
    BUILD_FAILED, BUILD_SUCCEEDED,
};
pub use format::SourceFormatter;
pub use pipeline::{BuildPipeline, Flow};
pub use request::{BuildOutcome, BuildRequest, Diagnostics};
