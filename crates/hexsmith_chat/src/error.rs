//! Error types for code generation.

use std::fmt;

use crate::knowledge::Transcript;

/// Code generation errors
#[derive(Debug)]
pub enum ChatError {
    /// No completion credential is configured
    LlmNotConfigured,
    /// Completion request failed
    LlmError(String),
    /// The retrieval subprocess did not answer in time
    RetrievalTimeout {
        timeout_ms: u64,
        transcript: Transcript,
    },
    /// No retrieval subprocess could be started
    RetrievalUnavailable(String),
    /// No tier could produce code (no literal, no rule match, no credential)
    GenerationUnavailable,
    /// The completion service answered with nothing usable
    EmptyGeneration,
    /// A built-in pattern failed to compile
    PatternError(String),
    /// File system or process error
    IoError(std::io::Error),
    /// Serialization error
    SerializationError(String),
}

impl ChatError {
    /// Whether the pipeline should degrade to a plain build rather than fail.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            Self::LlmNotConfigured
                | Self::LlmError(_)
                | Self::GenerationUnavailable
                | Self::EmptyGeneration
                | Self::RetrievalTimeout { .. }
                | Self::RetrievalUnavailable(_)
        )
    }

    /// Subprocess transcript, when the error carries one.
    pub fn transcript(&self) -> Option<&Transcript> {
        match self {
            Self::RetrievalTimeout { transcript, .. } => Some(transcript),
            _ => None,
        }
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LlmNotConfigured => write!(
                f,
                "LLM not configured. Set OPENAI_API_KEY, OPENAI_KEY or OPENAI_TOKEN"
            ),
            Self::LlmError(msg) => write!(f, "LLM error: {}", msg),
            Self::RetrievalTimeout { timeout_ms, .. } => {
                write!(f, "Knowledge retrieval timed out after {}ms", timeout_ms)
            }
            Self::RetrievalUnavailable(msg) => {
                write!(f, "Knowledge retrieval unavailable: {}", msg)
            }
            Self::GenerationUnavailable => write!(
                f,
                "No code generation available (no code, no matching rule, no credential)"
            ),
            Self::EmptyGeneration => write!(f, "Code generation returned empty code"),
            Self::PatternError(msg) => write!(f, "Invalid pattern: {}", msg),
            Self::IoError(e) => write!(f, "I/O error: {}", e),
            Self::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<regex::Error> for ChatError {
    fn from(err: regex::Error) -> Self {
        Self::PatternError(err.to_string())
    }
}

/// Result type for generation operations
pub type ChatResult<T> = Result<T, ChatError>;
