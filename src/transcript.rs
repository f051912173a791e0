//! Questions, transcript messages and the callback sink.
//!
//! A [`Transcript`] is the append-only log of one question's execution. Insertion
//! order is the only ordering guarantee and equals causal order: the runtime is the
//! sole writer and appends each step after it completes.
//!
//! A [`TranscriptSink`] observes the same messages as they are appended, plus one
//! [`ExecutionSummary`] when the execution context is released. Sinks are shared
//! across concurrent questions, so implementations take `&self`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::tools::ToolCall;

/// Author used for messages the runtime writes itself.
pub const SYSTEM_AUTHOR: &str = "system";

/// Immutable user question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    text: String,
    submitted_at: DateTime<Utc>,
}

impl Question {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            submitted_at: Utc::now(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }
}

impl From<&str> for Question {
    fn from(text: &str) -> Self {
        Question::new(text)
    }
}

impl From<String> for Question {
    fn from(text: String) -> Self {
        Question::new(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Framing written by the runtime (the question, failure notes)
    Instruction,
    /// A responder's answer
    Content,
    /// A responder deferring to another responder
    HandoffDirective,
    /// A tool call made while a responder was active
    Tool,
}

/// One unit of transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub author: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(author: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(SYSTEM_AUTHOR, Role::Instruction, text)
    }

    pub fn content(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(author, Role::Content, text)
    }

    pub fn handoff(author: &str, target: &str, reason: &str) -> Self {
        Self::new(
            author,
            Role::HandoffDirective,
            format!("handoff to {target}: {reason}"),
        )
    }

    pub fn tool(author: impl Into<String>, call: &ToolCall) -> Self {
        Self::new(author, Role::Tool, call.summary())
    }
}

/// Append-only message log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Handoff directives in append order.
    pub fn handoffs(&self) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .filter(|m| m.role == Role::HandoffDirective)
    }

    /// Whether `author` has already deferred the question.
    pub fn has_declined(&self, author: &str) -> bool {
        self.handoffs().any(|m| m.author == author)
    }
}

/// How an execution ended, as reported to sinks on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitPath {
    Completed,
    Degraded,
    Cancelled,
    /// The `process` future was dropped or failed before producing an outcome
    Aborted,
}

/// Emitted once per execution context, whatever the exit path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub request_id: Uuid,
    pub exit: ExitPath,
    pub active: String,
    pub hops: usize,
    pub messages: usize,
    pub elapsed: Duration,
}

/// Observer for transcript appends and context release.
pub trait TranscriptSink: Send + Sync + 'static {
    fn on_message(&self, request_id: Uuid, message: &Message);

    fn on_release(&self, _summary: &ExecutionSummary) {}
}

/// Shared sink handle.
pub type SharedSink = Arc<dyn TranscriptSink>;

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl TranscriptSink for NoopSink {
    fn on_message(&self, _request_id: Uuid, _message: &Message) {}
}

/// Writes every transition as a structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TranscriptSink for TracingSink {
    fn on_message(&self, request_id: Uuid, message: &Message) {
        match message.role {
            Role::HandoffDirective => info!(
                %request_id,
                author = %message.author,
                "🔄 {}",
                message.text
            ),
            Role::Content => info!(
                %request_id,
                author = %message.author,
                chars = message.text.len(),
                "answer recorded"
            ),
            Role::Tool | Role::Instruction => debug!(
                %request_id,
                author = %message.author,
                role = ?message.role,
                "{}",
                message.text
            ),
        }
    }

    fn on_release(&self, summary: &ExecutionSummary) {
        info!(
            request_id = %summary.request_id,
            exit = ?summary.exit,
            active = %summary.active,
            hops = summary.hops,
            messages = summary.messages,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "execution context released"
        );
    }
}

/// Keeps everything in memory; used by tests and demos.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    messages: Arc<Mutex<Vec<(Uuid, Message)>>>,
    releases: Arc<Mutex<Vec<ExecutionSummary>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(Uuid, Message)> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn messages_for(&self, request_id: Uuid) -> Vec<Message> {
        self.messages()
            .into_iter()
            .filter(|(id, _)| *id == request_id)
            .map(|(_, m)| m)
            .collect()
    }

    pub fn releases(&self) -> Vec<ExecutionSummary> {
        self.releases
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl TranscriptSink for CollectingSink {
    fn on_message(&self, request_id: Uuid, message: &Message) {
        if let Ok(mut guard) = self.messages.lock() {
            guard.push((request_id, message.clone()));
        }
    }

    fn on_release(&self, summary: &ExecutionSummary) {
        if let Ok(mut guard) = self.releases.lock() {
            guard.push(summary.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_question_keeps_text_verbatim() {
        let before = Utc::now();
        let q = Question::new("  Who won?  ");
        assert_eq!(q.text(), "  Who won?  ");
        assert!(q.submitted_at() >= before);
    }

    #[test]
    fn test_transcript_preserves_insertion_order() {
        let mut t = Transcript::new();
        t.push(Message::system("question: Alien?"));
        t.push(Message::handoff("search", "generic", "out of domain"));
        t.push(Message::content("generic", "An answer"));

        let roles: Vec<Role> = t.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::Instruction, Role::HandoffDirective, Role::Content]
        );
        assert!(t.has_declined("search"));
        assert!(!t.has_declined("generic"));
        assert_eq!(t.messages()[2].author, "generic");
        assert_eq!(t.handoffs().count(), 1);
    }

    #[test]
    fn test_handoff_message_text() {
        let m = Message::handoff("search", "generic", "out of domain");
        assert_eq!(m.text, "handoff to generic: out of domain");
        assert_eq!(m.role, Role::HandoffDirective);
    }

    #[test]
    fn test_collecting_sink_groups_by_request() {
        let sink = CollectingSink::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        sink.on_message(a, &Message::system("one"));
        sink.on_message(b, &Message::system("two"));
        sink.on_message(a, &Message::content("search", "three"));

        let for_a = sink.messages_for(a);
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a[1].text, "three");
        assert_eq!(sink.messages().len(), 3);
    }

    #[test]
    fn test_role_serializes_snake_case() {
        let json = serde_json::to_string(&Role::HandoffDirective).unwrap();
        assert_eq!(json, "\"handoff_directive\"");
    }
}
