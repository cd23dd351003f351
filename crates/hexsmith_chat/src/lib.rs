//! # hexsmith_chat - Code generation for hexsmith
//!
//! Turns a request into program source for the Zoombit PXT project:
//!
//! - **Literal** source is passed through untouched
//! - **Rules** answer common intents (headlights, timed movement) offline
//! - **Remote** synthesis goes through an OpenAI-compatible completion API,
//!   optionally enriched with reference material from a retrieval subprocess
//!
//! Strict mode keeps short, exact requests minimal: retrieved context is
//! left out and a deny-listed construct in the answer triggers one
//! regeneration. The same completion client also serves build repairs.

pub mod error;
pub mod generator;
pub mod knowledge;
pub mod llm;
pub mod mock;
pub mod prompt;
pub mod repair;
pub mod rules;
pub mod strict;

pub use error::{ChatError, ChatResult};
pub use generator::{
    CodeGenerator, CompletionTrace, Generation, GenerationRequest, GenerationTrace, Tier,
};
pub use knowledge::{
    parse_response, KnowledgeClient, KnowledgeConfig, KnowledgeContent, KnowledgeResult,
    KnowledgeSection, KnowledgeSource, Transcript,
};
pub use llm::{
    strip_code_fences, truncate, CompletionClient, CompletionRequest, CompletionResponse, Message,
    MessageRole, OpenAiClient,
};
pub use mock::{ScriptedCompletion, StaticKnowledge};
pub use prompt::GenerationContext;
pub use repair::RepairClient;
pub use rules::IntentRules;
pub use strict::StrictValidator;
