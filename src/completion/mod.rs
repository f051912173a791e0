//! Language completion collaborator
//!
//! Wraps the async-openai crate behind a narrow [`Completion`] trait so the generic
//! responder can be driven by a real model or by one of the deterministic fakes
//! below. Quota, timeout and transport failures all surface as
//! [`RouterError::CompletionUnavailable`], which responders treat as recoverable.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::RouterConfig;
use crate::error::{Result, RouterError};
use crate::transcript::{Message, Role};

/// Instructions for the general-purpose assistant.
pub const GENERAL_ASSISTANT_PROMPT: &str = "You are a helpful AI assistant. \
Provide clear, accurate, and engaging answers to user questions across any topic, including \
general knowledge, explanations, problem-solving, technology, math, and creative tasks. \
If you don't know something, say so and offer possible next steps. \
Be professional, friendly, and concise. \
Politely refuse to provide harmful, unsafe, or disallowed content.";

#[async_trait]
pub trait Completion: Send + Sync {
    /// Answer `prompt` given the transcript so far.
    async fn complete(&self, prompt: &str, history: &[Message]) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// OpenAI chat completion client
pub struct OpenAICompletion {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    instructions: String,
}

impl OpenAICompletion {
    /// Client configured from `OPENAI_API_KEY` and the router's model settings.
    pub fn new(config: &RouterConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client<OpenAIConfig>, config: &RouterConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            instructions: GENERAL_ASSISTANT_PROMPT.to_string(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    fn build_messages(
        &self,
        prompt: &str,
        history: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.instructions.clone())
                .build()?
                .into(),
        ];

        for msg in history {
            match msg.role {
                Role::Content => messages.push(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(msg.text.clone())
                        .build()?
                        .into(),
                ),
                Role::Tool => messages.push(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(format!("[{} looked up] {}", msg.author, msg.text))
                        .build()?
                        .into(),
                ),
                // Routing chatter carries nothing the model can use
                Role::Instruction | Role::HandoffDirective => {}
            }
        }

        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt.to_string())
                .build()?
                .into(),
        );
        Ok(messages)
    }
}

#[async_trait]
impl Completion for OpenAICompletion {
    async fn complete(&self, prompt: &str, history: &[Message]) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.build_messages(prompt, history)?)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!(model = %self.model, error = %e, "completion request failed");
            RouterError::CompletionUnavailable {
                message: e.to_string(),
            }
        })?;

        if let Some(usage) = &response.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "completion usage"
            );
        }

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| RouterError::CompletionUnavailable {
                message: "No content in response".to_string(),
            })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ===== Deterministic fakes =====

/// Always answers with the same text and counts calls.
#[derive(Debug, Default)]
pub struct FixedCompletion {
    answer: String,
    calls: AtomicUsize,
}

impl FixedCompletion {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Completion for FixedCompletion {
    async fn complete(&self, _prompt: &str, _history: &[Message]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.clone())
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}

/// Always unavailable, like an exhausted quota.
#[derive(Debug, Clone, Default)]
pub struct FailingCompletion;

#[async_trait]
impl Completion for FailingCompletion {
    async fn complete(&self, _prompt: &str, _history: &[Message]) -> Result<String> {
        Err(RouterError::CompletionUnavailable {
            message: "quota exceeded".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

/// Never returns.
#[derive(Debug, Clone, Default)]
pub struct HangingCompletion;

#[async_trait]
impl Completion for HangingCompletion {
    async fn complete(&self, _prompt: &str, _history: &[Message]) -> Result<String> {
        std::future::pending::<Result<String>>().await
    }

    fn model_name(&self) -> &str {
        "hanging"
    }
}
