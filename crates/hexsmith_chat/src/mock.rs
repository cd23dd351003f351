//! Scripted collaborators for tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{ChatError, ChatResult};
use crate::knowledge::{KnowledgeContent, KnowledgeResult, KnowledgeSection, KnowledgeSource};
use crate::llm::{CompletionClient, CompletionRequest, CompletionResponse};

enum Reply {
    Text(String),
    Failure(String),
}

/// Completion client answering from a queue of scripted replies.
///
/// Every request is captured. An exhausted queue answers with an error.
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful reply.
    pub fn reply(self, content: impl Into<String>) -> Self {
        self.replies.lock().push_back(Reply::Text(content.into()));
        self
    }

    /// Queue a transport failure.
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.replies.lock().push_back(Reply::Failure(message.into()));
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Default for ScriptedCompletion {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    fn model(&self) -> String {
        "scripted".to_string()
    }

    async fn complete(&self, request: CompletionRequest) -> ChatResult<CompletionResponse> {
        self.requests.lock().push(request);
        let next = self.replies.lock().pop_front();
        match next {
            Some(Reply::Text(content)) => Ok(CompletionResponse {
                content,
                model: self.model(),
                status: 200,
                raw: serde_json::Value::Null,
            }),
            Some(Reply::Failure(message)) => Err(ChatError::LlmError(message)),
            None => Err(ChatError::LlmError("no scripted reply left".to_string())),
        }
    }
}

/// Knowledge source returning a fixed result and recording queries.
pub struct StaticKnowledge {
    content: Option<KnowledgeContent>,
    queries: Mutex<Vec<String>>,
}

impl StaticKnowledge {
    pub fn sections(ids: &[&str]) -> Self {
        Self::with_content(KnowledgeContent::Sections(
            ids.iter()
                .map(|id| KnowledgeSection {
                    id: id.to_string(),
                    snippets: Vec::new(),
                })
                .collect(),
        ))
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Self::with_content(KnowledgeContent::Raw(text.into()))
    }

    /// A source whose subprocess can never be started.
    pub fn unavailable() -> Self {
        Self {
            content: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    fn with_content(content: KnowledgeContent) -> Self {
        Self {
            content: Some(content),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl KnowledgeSource for StaticKnowledge {
    async fn query(&self, query: &str) -> ChatResult<KnowledgeResult> {
        self.queries.lock().push(query.to_string());
        match &self.content {
            Some(content) => Ok(KnowledgeResult {
                content: content.clone(),
                ..Default::default()
            }),
            None => Err(ChatError::RetrievalUnavailable(
                "no interpreter available".to_string(),
            )),
        }
    }
}
