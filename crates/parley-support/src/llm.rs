use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use parley_types::models::{Message, MessageRole};

use crate::error::{SupportError, SupportResult};

/// Longest subject line a summary may produce.
pub const MAX_SUBJECT_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    pub role: &'static str,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub turns: Vec<ChatTurn>,
    pub max_tokens: u32,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> SupportResult<String>;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Stand-in when no model is configured; every call is an upstream failure
/// so callers take their fallback path.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    async fn complete(&self, _request: CompletionRequest) -> SupportResult<String> {
        Err(SupportError::Upstream("language model not configured".into()))
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

/// Client for any `/chat/completions` endpoint speaking the OpenAI schema.
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatCompletionsClient {
    pub fn new(settings: &LlmSettings) -> SupportResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(SupportError::upstream)?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        })
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsClient {
    async fn complete(&self, request: CompletionRequest) -> SupportResult<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.turns,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SupportError::Upstream(format!("model request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SupportError::Upstream(format!("model returned {}: {}", status, detail)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| SupportError::Upstream(format!("unreadable model response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| SupportError::Upstream("model returned no choices".into()))?;

        debug!(model = %self.model, chars = content.len(), "completion received");
        Ok(content)
    }
}

/// Transcript rendered one line per message, oldest first.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Turns a conversation transcript into a one-line ticket subject.
#[derive(Clone)]
pub struct Summarizer {
    model: Arc<dyn LanguageModel>,
}

impl Summarizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn summarize(&self, transcript: &[Message]) -> SupportResult<String> {
        let request = CompletionRequest {
            turns: vec![
                ChatTurn::system(
                    "Summarize this support conversation as a ticket subject. \
                     Reply with one short line, no quotes, no trailing period.",
                ),
                ChatTurn::user(render_transcript(transcript)),
            ],
            max_tokens: 40,
        };

        let raw = self.model.complete(request).await?;
        subject_line(&raw).ok_or_else(|| SupportError::Upstream("summary was empty".into()))
    }
}

/// First non-blank line, trimmed of whitespace and wrapping quotes, capped
/// at `MAX_SUBJECT_CHARS`.
pub fn subject_line(raw: &str) -> Option<String> {
    let line = raw
        .lines()
        .map(|l| l.trim().trim_matches(|c| c == '"' || c == '\'').trim())
        .find(|l| !l.is_empty())?;

    Some(line.chars().take(MAX_SUBJECT_CHARS).collect::<String>().trim_end().to_string())
}

/// Writes assistant replies while a conversation is still AI-only.
#[derive(Clone)]
pub struct Assistant {
    model: Arc<dyn LanguageModel>,
}

impl Assistant {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn reply(&self, history: &[Message]) -> SupportResult<String> {
        let mut turns = vec![ChatTurn::system(
            "You are a helpful support assistant. Answer briefly. If you cannot \
             help, suggest the visitor ask for a human.",
        )];
        turns.extend(history.iter().filter_map(|m| {
            let role = match m.role {
                MessageRole::User => "user",
                MessageRole::Assistant | MessageRole::Admin => "assistant",
                MessageRole::System => return None,
            };
            Some(ChatTurn {
                role,
                content: m.content.clone(),
            })
        }));

        let reply = self
            .model
            .complete(CompletionRequest {
                turns,
                max_tokens: 400,
            })
            .await?;

        let reply = reply.trim();
        if reply.is_empty() {
            return Err(SupportError::Upstream("assistant reply was empty".into()));
        }
        Ok(reply.to_string())
    }
}
