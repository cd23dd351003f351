//! Single-file repair requests.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{ChatError, ChatResult};
use crate::llm::{strip_code_fences, truncate, CompletionClient, CompletionRequest, Message};

pub const REPAIR_SYSTEM_PROMPT: &str = "You are a MakeCode (PXT) micro:bit TypeScript repair assistant for the Zoombit project. Produce a single corrected TypeScript file that compiles. Output only TypeScript code.";

/// Diagnostics beyond this many bytes are cut.
pub const MAX_DIAGNOSTICS: usize = 4000;

/// Asks the completion service for a corrected version of one file.
#[derive(Clone)]
pub struct RepairClient {
    completion: Arc<dyn CompletionClient>,
    model: Option<String>,
}

impl RepairClient {
    pub fn new(completion: Arc<dyn CompletionClient>) -> Self {
        Self {
            completion,
            model: None,
        }
    }

    pub fn model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Corrected full-file replacement for `file`.
    pub async fn repair(&self, file: &str, code: &str, diagnostics: &str) -> ChatResult<String> {
        info!(file = %file, "[AUTOFIX] Requesting repair");
        let request = CompletionRequest::new(
            vec![
                Message::system(REPAIR_SYSTEM_PROMPT),
                Message::user(repair_prompt(file, code, diagnostics)),
            ],
            0.0,
        )
        .model(self.model.clone());

        let response = self.completion.complete(request).await?;
        debug!(status = response.status, "[AUTOFIX] Repair response received");

        let fixed = strip_code_fences(&response.content);
        if fixed.trim().is_empty() {
            return Err(ChatError::EmptyGeneration);
        }
        Ok(fixed)
    }
}

/// User message for a repair request.
pub fn repair_prompt(file: &str, code: &str, diagnostics: &str) -> String {
    [
        format!("File: {}", file),
        "Current code:".to_string(),
        "```typescript".to_string(),
        code.to_string(),
        "```".to_string(),
        String::new(),
        "PXT build errors/stderr:".to_string(),
        "```".to_string(),
        truncate(diagnostics, MAX_DIAGNOSTICS).to_string(),
        "```".to_string(),
        String::new(),
        "Please return a fixed version of the file only, no markdown fences.".to_string(),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, MockCompletionClient};

    #[test]
    fn test_prompt_truncates_diagnostics() {
        let prompt = repair_prompt("main.ts", "let x = ", &"e".repeat(5000));
        assert!(prompt.starts_with("File: main.ts\nCurrent code:\n```typescript\nlet x = \n```\n"));
        assert!(prompt.contains(&format!("```\n{}\n```", "e".repeat(4000))));
        assert!(!prompt.contains(&"e".repeat(4001)));
    }

    #[tokio::test]
    async fn test_repair_strips_fences() {
        let mut mock = MockCompletionClient::new();
        mock.expect_complete()
            .withf(|req| req.temperature == 0.0 && req.messages[0].content == REPAIR_SYSTEM_PROMPT)
            .times(1)
            .returning(|_| {
                Ok(CompletionResponse {
                    content: "```ts\nzoombit.brake()\n```".to_string(),
                    model: "m".to_string(),
                    status: 200,
                    raw: serde_json::Value::Null,
                })
            });

        let client = RepairClient::new(Arc::new(mock));
        let fixed = client.repair("main.ts", "zoombit.brak()", "error TS2339").await.unwrap();
        assert_eq!(fixed, "zoombit.brake()");
    }

    #[tokio::test]
    async fn test_repair_empty_reply() {
        let mut mock = MockCompletionClient::new();
        mock.expect_complete().returning(|_| {
            Ok(CompletionResponse {
                content: "  ".to_string(),
                model: "m".to_string(),
                status: 200,
                raw: serde_json::Value::Null,
            })
        });

        let client = RepairClient::new(Arc::new(mock));
        assert!(matches!(
            client.repair("main.ts", "x", "y").await,
            Err(ChatError::EmptyGeneration)
        ));
    }
}
