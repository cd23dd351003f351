//! Three-tier code generation.
//!
//! Tiers are tried in order and the first one that yields code wins:
//! caller-supplied source, deterministic intent rules, then the remote
//! completion service. Strict requests that come back with disallowed
//! constructs get exactly one regeneration.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ChatError, ChatResult};
use crate::knowledge::{KnowledgeResult, KnowledgeSource, Transcript};
use crate::llm::{strip_code_fences, truncate, CompletionClient, CompletionRequest, Message};
use crate::prompt::{GenerationContext, SYSTEM_PROMPT};
use crate::rules::IntentRules;
use crate::strict::StrictValidator;

const DEFAULT_TEMPERATURE: f32 = 0.2;
const STRICT_TEMPERATURE: f32 = 0.0;
const SNIPPET_LEN: usize = 400;

/// Generation tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Literal,
    Rules,
    Remote,
}

impl Tier {
    pub const ORDER: [Tier; 3] = [Tier::Literal, Tier::Rules, Tier::Remote];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Literal => "literal",
            Tier::Rules => "rules",
            Tier::Remote => "remote",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to generate.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Literal source; used verbatim when non-blank
    pub code: Option<String>,
    /// Retrieval query; defaults to the prompt
    pub query: Option<String>,
    /// Forces strict mode on or off; inferred from the prompt when `None`
    pub strict: Option<bool>,
    pub use_knowledge: bool,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            code: None,
            query: None,
            strict: None,
            use_knowledge: true,
            model: None,
            temperature: None,
        }
    }

    pub fn code(mut self, code: Option<String>) -> Self {
        self.code = code;
        self
    }

    pub fn query(mut self, query: Option<String>) -> Self {
        self.query = query;
        self
    }

    pub fn strict(mut self, strict: Option<bool>) -> Self {
        self.strict = strict;
        self
    }

    pub fn use_knowledge(mut self, use_knowledge: bool) -> Self {
        self.use_knowledge = use_knowledge;
        self
    }

    pub fn model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    fn literal(&self) -> Option<&str> {
        self.code.as_deref().filter(|c| !c.trim().is_empty())
    }
}

/// Generated program.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub code: String,
    pub tier: Tier,
    pub strict: bool,
    /// Whether the strict-mode regeneration replaced the first candidate
    pub regenerated: bool,
}

/// One completion exchange.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionTrace {
    pub status: u16,
    pub temperature: f32,
    pub snippet: String,
}

/// Debug record of a generation run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationTrace {
    pub strict: bool,
    pub prompt: Option<String>,
    pub retrieval: Option<Transcript>,
    pub retrieval_error: Option<String>,
    pub completions: Vec<CompletionTrace>,
    pub violations: Vec<String>,
}

/// Produces program source from a request.
pub struct CodeGenerator {
    rules: IntentRules,
    validator: StrictValidator,
    completion: Option<Arc<dyn CompletionClient>>,
    knowledge: Option<Arc<dyn KnowledgeSource>>,
}

impl CodeGenerator {
    pub fn new() -> ChatResult<Self> {
        Ok(Self {
            rules: IntentRules::new()?,
            validator: StrictValidator::new()?,
            completion: None,
            knowledge: None,
        })
    }

    pub fn with_completion(mut self, completion: Arc<dyn CompletionClient>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeSource>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn has_completion(&self) -> bool {
        self.completion.is_some()
    }

    pub fn completion(&self) -> Option<Arc<dyn CompletionClient>> {
        self.completion.clone()
    }

    pub fn rules(&self) -> &IntentRules {
        &self.rules
    }

    /// Run the tiers in order.
    ///
    /// Fails with [`ChatError::GenerationUnavailable`] when no tier applies.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        trace: &mut GenerationTrace,
    ) -> ChatResult<Generation> {
        for tier in Tier::ORDER {
            if let Some(generation) = self.attempt(tier, request, trace).await? {
                info!(tier = %tier, strict = generation.strict, "[GEN] Code generated");
                return Ok(generation);
            }
            debug!(tier = %tier, "[GEN] Tier did not apply");
        }
        Err(ChatError::GenerationUnavailable)
    }

    async fn attempt(
        &self,
        tier: Tier,
        request: &GenerationRequest,
        trace: &mut GenerationTrace,
    ) -> ChatResult<Option<Generation>> {
        match tier {
            Tier::Literal => Ok(request.literal().map(|code| Generation {
                code: code.to_string(),
                tier,
                strict: false,
                regenerated: false,
            })),
            Tier::Rules => Ok(self.rules.generate(&request.prompt).map(|code| Generation {
                code: self.rules.normalize_headlight(&code, &request.prompt),
                tier,
                strict: false,
                regenerated: false,
            })),
            Tier::Remote => match &self.completion {
                Some(client) => self.synthesize(client.as_ref(), request, trace).await.map(Some),
                None => Ok(None),
            },
        }
    }

    async fn synthesize(
        &self,
        client: &dyn CompletionClient,
        request: &GenerationRequest,
        trace: &mut GenerationTrace,
    ) -> ChatResult<Generation> {
        let strict = request
            .strict
            .unwrap_or_else(|| self.rules.infer_strict(&request.prompt));
        trace.strict = strict;

        let knowledge = if strict || !request.use_knowledge {
            None
        } else {
            self.retrieve(request, trace).await
        };

        let context = GenerationContext::new(request.prompt.clone())
            .knowledge(knowledge)
            .strict(strict);
        let temperature = request.temperature.unwrap_or(if strict {
            STRICT_TEMPERATURE
        } else {
            DEFAULT_TEMPERATURE
        });

        let mut code = self
            .complete(client, &context, temperature, request.model.clone(), trace)
            .await?;
        if code.trim().is_empty() {
            return Err(ChatError::EmptyGeneration);
        }

        let mut regenerated = false;
        if strict {
            let violations = self.validator.violations(&code);
            if !violations.is_empty() {
                warn!(violations = ?violations, "[GEN] Strict-mode violation, regenerating once");
                trace.violations = violations;
                match self
                    .complete(
                        client,
                        &context.regeneration(),
                        STRICT_TEMPERATURE,
                        request.model.clone(),
                        trace,
                    )
                    .await
                {
                    Ok(second) if !second.trim().is_empty() => {
                        code = second;
                        regenerated = true;
                    }
                    Ok(_) => warn!("[GEN] Regeneration returned empty code, keeping first attempt"),
                    Err(e) => warn!(error = %e, "[GEN] Regeneration failed, keeping first attempt"),
                }
            }
        }

        Ok(Generation {
            code: self.rules.normalize_headlight(&code, &request.prompt),
            tier: Tier::Remote,
            strict,
            regenerated,
        })
    }

    async fn retrieve(
        &self,
        request: &GenerationRequest,
        trace: &mut GenerationTrace,
    ) -> Option<KnowledgeResult> {
        let source = self.knowledge.as_ref()?;
        let query = request
            .query
            .as_deref()
            .unwrap_or(request.prompt.as_str());

        match source.query(query).await {
            Ok(result) => {
                trace.retrieval = Some(result.transcript.clone());
                (!result.is_empty()).then_some(result)
            }
            Err(e) => {
                warn!(error = %e, "[GEN] Knowledge retrieval failed, continuing without context");
                trace.retrieval = e.transcript().cloned();
                trace.retrieval_error = Some(e.to_string());
                None
            }
        }
    }

    async fn complete(
        &self,
        client: &dyn CompletionClient,
        context: &GenerationContext,
        temperature: f32,
        model: Option<String>,
        trace: &mut GenerationTrace,
    ) -> ChatResult<String> {
        let user = context.render();
        debug!(prompt = %user, "[GEN] Completion prompt");
        if trace.prompt.is_none() {
            trace.prompt = Some(user.clone());
        }

        let request = CompletionRequest::new(
            vec![Message::system(SYSTEM_PROMPT), Message::user(user)],
            temperature,
        )
        .model(model);
        let response = client.complete(request).await?;

        trace.completions.push(CompletionTrace {
            status: response.status,
            temperature,
            snippet: truncate(&response.content, SNIPPET_LEN).to_string(),
        });
        Ok(strip_code_fences(&response.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{KnowledgeContent, MockKnowledgeSource};
    use crate::llm::{CompletionResponse, MockCompletionClient};

    fn reply(content: &str) -> ChatResult<CompletionResponse> {
        Ok(CompletionResponse {
            content: content.to_string(),
            model: "test".to_string(),
            status: 200,
            raw: serde_json::Value::Null,
        })
    }

    #[tokio::test]
    async fn test_literal_wins() {
        let generator = CodeGenerator::new().unwrap();
        let request = GenerationRequest::new("move forward for 2 sec")
            .code(Some("basic.showString(\"hi\")".to_string()));
        let generation = generator
            .generate(&request, &mut GenerationTrace::default())
            .await
            .unwrap();
        assert_eq!(generation.tier, Tier::Literal);
        assert_eq!(generation.code, "basic.showString(\"hi\")");
    }

    #[tokio::test]
    async fn test_rules_before_remote() {
        let mut mock = MockCompletionClient::new();
        mock.expect_complete().times(0);
        let generator = CodeGenerator::new().unwrap().with_completion(Arc::new(mock));

        let request = GenerationRequest::new("move forward for 2 sec").code(Some("  ".to_string()));
        let generation = generator
            .generate(&request, &mut GenerationTrace::default())
            .await
            .unwrap();
        assert_eq!(generation.tier, Tier::Rules);
        assert!(generation.code.contains("basic.pause(2000)"));
    }

    #[tokio::test]
    async fn test_nothing_applies() {
        let generator = CodeGenerator::new().unwrap();
        let result = generator
            .generate(&GenerationRequest::new("dance"), &mut GenerationTrace::default())
            .await;
        assert!(matches!(result, Err(ChatError::GenerationUnavailable)));
    }

    #[tokio::test]
    async fn test_remote_with_knowledge() {
        let mut knowledge = MockKnowledgeSource::new();
        knowledge
            .expect_query()
            .withf(|q| q.contains("dance moves"))
            .times(1)
            .returning(|_| {
                Ok(KnowledgeResult {
                    content: KnowledgeContent::Raw("zoombit.turn(TurnDirection.Left, 80)".to_string()),
                    ..Default::default()
                })
            });

        let mut completion = MockCompletionClient::new();
        completion
            .expect_complete()
            .withf(|req| {
                req.temperature == 0.2
                    && req.user_content().contains("/* Examples (raw) */")
                    && req.messages[0].content == SYSTEM_PROMPT
            })
            .times(1)
            .returning(|_| reply("```typescript\nzoombit.turn(TurnDirection.Left, 80)\n```"));

        let generator = CodeGenerator::new()
            .unwrap()
            .with_completion(Arc::new(completion))
            .with_knowledge(Arc::new(knowledge));
        let request = GenerationRequest::new("make it dance").query(Some("dance moves".to_string()));
        let mut trace = GenerationTrace::default();
        let generation = generator.generate(&request, &mut trace).await.unwrap();

        assert_eq!(generation.tier, Tier::Remote);
        assert!(!generation.strict);
        assert_eq!(generation.code, "zoombit.turn(TurnDirection.Left, 80)");
        assert_eq!(trace.completions.len(), 1);
        assert!(trace.retrieval.is_some());
    }

    #[tokio::test]
    async fn test_empty_remote_reply() {
        let mut completion = MockCompletionClient::new();
        completion.expect_complete().returning(|_| reply("\n"));
        let generator = CodeGenerator::new().unwrap().with_completion(Arc::new(completion));

        let result = generator
            .generate(
                &GenerationRequest::new("draw a heart").use_knowledge(false),
                &mut GenerationTrace::default(),
            )
            .await;
        assert!(matches!(result, Err(ChatError::EmptyGeneration)));
    }

    #[tokio::test]
    async fn test_retrieval_failure_is_not_fatal() {
        let mut knowledge = MockKnowledgeSource::new();
        knowledge
            .expect_query()
            .returning(|_| Err(ChatError::RetrievalUnavailable("no python".to_string())));
        let mut completion = MockCompletionClient::new();
        completion
            .expect_complete()
            .returning(|_| reply("basic.showIcon(IconNames.Heart)"));

        let generator = CodeGenerator::new()
            .unwrap()
            .with_completion(Arc::new(completion))
            .with_knowledge(Arc::new(knowledge));
        let mut trace = GenerationTrace::default();
        let generation = generator
            .generate(&GenerationRequest::new("draw a heart"), &mut trace)
            .await
            .unwrap();

        assert_eq!(generation.code, "basic.showIcon(IconNames.Heart)");
        assert!(trace.retrieval_error.unwrap().contains("no python"));
    }
}
