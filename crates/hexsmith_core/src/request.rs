//! Build requests and their outcomes.

use std::path::PathBuf;

use hexsmith_chat::GenerationRequest;
use hexsmith_project::ProjectLayout;
use hexsmith_runner::Artifact;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::CoreError;

/// A build request as posted by a client. Every field is optional and a
/// field of the wrong type reads as absent without touching the others.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildRequest {
    #[serde(deserialize_with = "lenient")]
    pub ai: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub prompt: Option<String>,
    /// Retrieval query, defaults to the prompt
    #[serde(deserialize_with = "lenient")]
    pub query: Option<String>,
    /// Literal program source
    #[serde(deserialize_with = "lenient")]
    pub code: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub overwrite_main: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub out_file: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub strict: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub no_examples: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub model: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub temperature: Option<f32>,
    #[serde(deserialize_with = "lenient")]
    pub auto_fix: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub debug: Option<bool>,
}

/// Reads a field, treating a value of the wrong type as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl BuildRequest {
    /// Parse a request body. Empty or malformed bodies count as `{}`.
    pub fn from_body(body: &[u8]) -> Self {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Self::default();
        }
        match serde_json::from_slice::<Value>(body) {
            Ok(value @ Value::Object(_)) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring malformed build request body");
                Self::default()
            }),
            Ok(_) => Self::default(),
            Err(e) => {
                warn!(error = %e, "Ignoring unparseable build request body");
                Self::default()
            }
        }
    }

    /// Whether any field asks for generation.
    pub fn is_ai_request(&self) -> bool {
        self.ai == Some(true)
            || self.prompt.is_some()
            || self.query.is_some()
            || self.code.is_some()
            || self.overwrite_main.is_some()
            || self.out_file.is_some()
    }

    /// Names of the fields that were set, for debug events.
    pub fn present_fields(&self) -> Vec<String> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, _)| k)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn overwrites_main(&self) -> bool {
        self.overwrite_main != Some(false)
    }

    /// Program file that stays declared in the manifest.
    pub fn program_file(&self) -> &'static str {
        if self.overwrites_main() {
            ProjectLayout::MAIN_FILE
        } else {
            ProjectLayout::GENERATED_FILE
        }
    }

    /// File the generated program is written to.
    pub fn output_file(&self) -> String {
        self.out_file
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(self.program_file())
            .to_string()
    }

    pub fn wants_debug(&self) -> bool {
        self.debug == Some(true)
    }

    pub fn wants_auto_fix(&self) -> bool {
        self.auto_fix == Some(true)
    }

    /// Generation parameters for this request.
    pub fn generation(&self) -> GenerationRequest {
        let prompt = self.prompt.clone().unwrap_or_default();
        GenerationRequest::new(prompt)
            .code(self.code.clone())
            .query(self.query.clone().filter(|q| !q.trim().is_empty()))
            // `strict: false` does not switch off inference
            .strict(self.strict.filter(|s| *s))
            .use_knowledge(self.no_examples != Some(true))
            .model(self.model.clone())
            .temperature(self.temperature)
    }
}

/// Captured output of a failed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub stdout: String,
    pub stderr: String,
    pub error: String,
}

impl From<&CoreError> for Diagnostics {
    fn from(err: &CoreError) -> Self {
        Self {
            stdout: err.stdout().to_string(),
            stderr: err.stderr().to_string(),
            error: err.to_string(),
        }
    }
}

/// Terminal result of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutcome {
    pub success: bool,
    pub message: String,
    /// Canonical artifact path
    #[serde(rename = "hex", skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub auto_fix_tried: bool,
    /// File the repair rewrote
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_source: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ai_disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub built_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub built_listing: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<Value>,
}

impl BuildOutcome {
    pub fn succeeded(message: impl Into<String>, artifact: &Artifact) -> Self {
        Self {
            success: true,
            message: message.into(),
            artifact_path: Some(artifact.path.clone()),
            size: Some(artifact.size),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>, err: &CoreError) -> Self {
        let mut outcome = Self {
            success: false,
            message: message.into(),
            diagnostics: Some(Diagnostics::from(err)),
            ..Default::default()
        };
        if let CoreError::ArtifactMissing {
            expected, listing, ..
        } = err
        {
            outcome.built_dir = expected.parent().map(PathBuf::from);
            outcome.expected = Some(expected.clone());
            outcome.built_listing = Some(listing.clone());
        }
        outcome
    }

    pub fn auto_fixed(mut self, target: impl Into<String>) -> Self {
        self.auto_fix_tried = true;
        self.target = Some(target.into());
        self
    }

    pub fn generated(mut self, output_file: impl Into<String>, source: impl Into<String>) -> Self {
        self.output_file = Some(output_file.into());
        self.generated_source = Some(source.into());
        self
    }

    pub fn ai_disabled(mut self) -> Self {
        self.ai_disabled = true;
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn debug(mut self, debug: Option<Value>) -> Self {
        self.debug = debug;
        self
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexsmith_runner::RunnerError;

    #[test]
    fn test_empty_and_invalid_bodies() {
        assert_eq!(BuildRequest::from_body(b""), BuildRequest::default());
        assert_eq!(BuildRequest::from_body(b"  \n"), BuildRequest::default());
        assert_eq!(BuildRequest::from_body(b"{not json"), BuildRequest::default());
        assert_eq!(BuildRequest::from_body(b"[1,2]"), BuildRequest::default());
        assert!(!BuildRequest::from_body(b"{}").is_ai_request());
    }

    #[test]
    fn test_mistyped_field_keeps_the_rest() {
        let request = BuildRequest::from_body(
            br#"{"prompt": "move forward for 2 sec", "autoFix": "true", "temperature": "hot", "debug": true}"#,
        );
        assert_eq!(request.prompt.as_deref(), Some("move forward for 2 sec"));
        assert_eq!(request.auto_fix, None);
        assert_eq!(request.temperature, None);
        assert!(request.wants_debug());
        assert!(request.is_ai_request());

        let request = BuildRequest::from_body(br#"{"code": 42, "outFile": "robot.ts"}"#);
        assert_eq!(request.code, None);
        assert_eq!(request.output_file(), "robot.ts");
    }

    #[test]
    fn test_ai_indicators() {
        for body in [
            r#"{"ai": true}"#,
            r#"{"prompt": "turn left"}"#,
            r#"{"query": "motors"}"#,
            r#"{"code": "basic.pause(1)"}"#,
            r#"{"overwriteMain": false}"#,
            r#"{"outFile": "x.ts"}"#,
        ] {
            assert!(BuildRequest::from_body(body.as_bytes()).is_ai_request(), "{}", body);
        }
        assert!(!BuildRequest::from_body(br#"{"ai": false, "autoFix": true}"#).is_ai_request());
    }

    #[test]
    fn test_output_file_defaults() {
        let req = BuildRequest::default();
        assert_eq!(req.output_file(), "main.ts");

        let req = BuildRequest {
            overwrite_main: Some(false),
            ..Default::default()
        };
        assert_eq!(req.output_file(), "ai.generated.ts");
        assert_eq!(req.program_file(), "ai.generated.ts");

        let req = BuildRequest {
            out_file: Some("robot.ts".to_string()),
            ..Default::default()
        };
        assert_eq!(req.output_file(), "robot.ts");
        assert_eq!(req.program_file(), "main.ts");
    }

    #[test]
    fn test_generation_mapping() {
        let req = BuildRequest::from_body(
            br#"{"prompt": "dance", "strict": false, "noExamples": true, "temperature": 0.5}"#,
        );
        let generation = req.generation();
        assert_eq!(generation.prompt, "dance");
        assert_eq!(generation.strict, None);
        assert!(!generation.use_knowledge);
        assert_eq!(generation.temperature, Some(0.5));
    }

    #[test]
    fn test_outcome_json_shape() {
        let err = CoreError::from(RunnerError::BuildFailed {
            command: "pxt build".to_string(),
            exit_code: 1,
            stdout: "out".to_string(),
            stderr: "main.ts(1,1): error TS1005".to_string(),
        });
        let json = BuildOutcome::failed("Build failed", &err)
            .auto_fixed("main.ts")
            .duration_ms(42)
            .to_json();

        assert_eq!(json["success"], false);
        assert_eq!(json["durationMs"], 42);
        assert_eq!(json["autoFixTried"], true);
        assert_eq!(json["diagnostics"]["stderr"], "main.ts(1,1): error TS1005");
        assert!(json.get("hex").is_none());
        assert!(json.get("aiDisabled").is_none());
    }

    #[test]
    fn test_missing_artifact_outcome() {
        let err = CoreError::ArtifactMissing {
            expected: PathBuf::from("/p/built/binary.hex"),
            listing: vec!["binary.js".to_string()],
            stdout: String::new(),
            stderr: String::new(),
        };
        let outcome = BuildOutcome::failed("Build completed but HEX not found", &err);
        assert_eq!(outcome.built_dir, Some(PathBuf::from("/p/built")));
        assert_eq!(outcome.built_listing, Some(vec!["binary.js".to_string()]));
    }
}
