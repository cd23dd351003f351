//! # hexsmith_project
//!
//! Project layout, manifest editing and source access for hexsmith.
//!
//! A project is a directory holding a `pxt.json` manifest, TypeScript
//! sources and a `built/` output directory. The manifest decides which
//! sources are compiled and which one is the program entry point.
//!
//! ## Features
//!
//! - **Root discovery**: walk up from a start directory to the manifest
//! - **Manifest editing**: idempotent, serialized, write-temp-then-rename updates
//! - **Program wiring**: one program file and one entry point, in a single rewrite
//! - **Source readback**: declared sources concatenated for display
//! - **Entry backup**: `main.ts` is copied once before it is first overwritten
//!
//! ## Example
//!
//! ```rust,no_run
//! use hexsmith_project::{ProjectLayout, SourceBundle};
//!
//! # async fn run() -> Result<(), hexsmith_project::ProjectError> {
//! let layout = ProjectLayout::discover(".");
//! layout.backup_main_once().await?;
//! layout.write_source("main.ts", "zoombit.brake()\n").await?;
//! layout.editor().wire_program("main.ts", "main.ts").await?;
//!
//! if let Some(bundle) = SourceBundle::read(&layout).await? {
//!     println!("{}", bundle.code);
//! }
//! # Ok(())
//! # }
//! ```

pub mod editor;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod sources;

pub use editor::ManifestEditor;
pub use error::{ProjectError, ProjectResult};
pub use layout::ProjectLayout;
pub use manifest::{ProjectManifest, PROGRAM_FILES};
pub use sources::{SourceBundle, SourceFile};
