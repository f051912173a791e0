//! Responders: units that either answer a question or defer it to another responder.
//!
//! The decision is a return value, never a thrown error: [`ResponderResult::Final`]
//! or [`ResponderResult::Handoff`]. Collaborator failures are absorbed inside the
//! responder and turned into one of those two outcomes.
//!
//! Responders hold no per-question state and take `&self`, so one instance serves
//! every in-flight question.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tools::ToolCall;
use crate::transcript::{Question, Transcript};

mod generic;
mod search;

pub use generic::GenericResponder;
pub use search::{extract_query, LookupQuery, SearchResponder};

/// Static answer used when nothing better can be produced.
pub const DEGRADED_ANSWER: &str = "I'm unable to answer right now. Please try again later.";

/// What a responder sees for one turn.
#[derive(Debug, Clone, Copy)]
pub struct ResponderInput<'a> {
    pub question: &'a Question,
    pub transcript: &'a Transcript,
    /// When false the caller needs an answer: the responder must return `Final`.
    pub allow_handoff: bool,
}

impl<'a> ResponderInput<'a> {
    pub fn new(question: &'a Question, transcript: &'a Transcript) -> Self {
        Self {
            question,
            transcript,
            allow_handoff: true,
        }
    }

    pub fn best_effort(question: &'a Question, transcript: &'a Transcript) -> Self {
        Self {
            question,
            transcript,
            allow_handoff: false,
        }
    }
}

/// Tagged decision of one responder turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponderResult {
    Final { answer: String },
    Handoff { target: String, reason: String },
}

impl ResponderResult {
    pub fn answer(answer: impl Into<String>) -> Self {
        ResponderResult::Final {
            answer: answer.into(),
        }
    }

    pub fn handoff(target: impl Into<String>, reason: impl Into<String>) -> Self {
        ResponderResult::Handoff {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ResponderResult::Final { .. })
    }
}

/// A decision plus the tool calls made while reaching it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponderOutput {
    pub result: ResponderResult,
    pub tool_calls: Vec<ToolCall>,
}

impl ResponderOutput {
    pub fn new(result: ResponderResult) -> Self {
        Self {
            result,
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }
}

/// Public description of a responder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderInfo {
    pub name: String,
    pub description: String,
    pub tools: Vec<String>,
}

#[async_trait]
pub trait Responder: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Names of the tool functions this responder may invoke.
    fn tools(&self) -> Vec<String>;

    async fn respond(&self, input: ResponderInput<'_>) -> ResponderOutput;

    fn describe(&self) -> ResponderInfo {
        ResponderInfo {
            name: self.name().to_string(),
            description: self.description().to_string(),
            tools: self.tools(),
        }
    }
}

/// Lowercased words of `text` with surrounding punctuation removed.
pub(crate) fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '-')
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
}
