//! General-knowledge responder backed by the completion collaborator.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{words, Responder, ResponderInput, ResponderOutput, ResponderResult, DEGRADED_ANSWER};
use crate::completion::Completion;
use crate::config::{GENERIC, SEARCH};

/// Words that suggest the question needs catalogue data.
const CATALOGUE_WORDS: &[&str] = &[
    "film",
    "films",
    "movie",
    "movies",
    "dvd",
    "dvds",
    "rental",
    "rentals",
    "rent",
    "streaming",
    "catalogue",
    "catalog",
];

pub struct GenericResponder {
    name: String,
    search: String,
    description: String,
    completion: Arc<dyn Completion>,
}

impl GenericResponder {
    pub fn new(completion: Arc<dyn Completion>) -> Self {
        Self {
            name: GENERIC.to_string(),
            search: SEARCH.to_string(),
            description: "A general-purpose assistant that can answer a wide variety of \
                          questions on different topics."
                .to_string(),
            completion,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Responder to consult for catalogue questions.
    pub fn with_search(mut self, target: impl Into<String>) -> Self {
        self.search = target.into();
        self
    }

    fn needs_catalogue(question: &str) -> bool {
        words(question).any(|w| CATALOGUE_WORDS.contains(&w.as_str()))
    }
}

#[async_trait]
impl Responder for GenericResponder {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn tools(&self) -> Vec<String> {
        Vec::new()
    }

    async fn respond(&self, input: ResponderInput<'_>) -> ResponderOutput {
        let question = input.question.text();

        // Only defer once: if search already declined, answering is the only way forward.
        if input.allow_handoff
            && Self::needs_catalogue(question)
            && !input.transcript.has_declined(&self.search)
        {
            debug!(responder = %self.name, target = %self.search, "deferring catalogue question");
            return ResponderOutput::new(ResponderResult::handoff(
                &self.search,
                "needs catalogue lookup",
            ));
        }

        let answer = match self
            .completion
            .complete(question, input.transcript.messages())
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(responder = %self.name, model = self.completion.model_name(), error = %e, "completion failed, degrading");
                DEGRADED_ANSWER.to_string()
            }
        };
        ResponderOutput::new(ResponderResult::answer(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{FailingCompletion, FixedCompletion};
    use crate::transcript::{Message, Question, Transcript};

    #[tokio::test]
    async fn answers_general_questions() {
        let completion = Arc::new(FixedCompletion::new("Argentina won in 2022."));
        let responder = GenericResponder::new(completion.clone());
        let q = Question::new("Who won the FIFA World Cup in 2022?");
        let out = responder
            .respond(ResponderInput::new(&q, &Transcript::new()))
            .await;
        assert_eq!(out.result, ResponderResult::answer("Argentina won in 2022."));
        assert_eq!(completion.calls(), 1);
    }

    #[tokio::test]
    async fn defers_catalogue_questions_once() {
        let responder = GenericResponder::new(Arc::new(FixedCompletion::new("general")));
        let q = Question::new("Which movie should I rent tonight?");

        let out = responder
            .respond(ResponderInput::new(&q, &Transcript::new()))
            .await;
        assert_eq!(
            out.result,
            ResponderResult::handoff(SEARCH, "needs catalogue lookup")
        );

        let mut t = Transcript::new();
        t.push(Message::handoff(SEARCH, GENERIC, "out of domain"));
        let out = responder.respond(ResponderInput::new(&q, &t)).await;
        assert_eq!(out.result, ResponderResult::answer("general"));
    }

    #[tokio::test]
    async fn degrades_when_completion_unavailable() {
        let responder = GenericResponder::new(Arc::new(FailingCompletion));
        let q = Question::new("What is the capital of France?");
        let out = responder
            .respond(ResponderInput::best_effort(&q, &Transcript::new()))
            .await;
        assert_eq!(out.result, ResponderResult::answer(DEGRADED_ANSWER));
    }

    #[test]
    fn describe_lists_no_tools() {
        let info = GenericResponder::new(Arc::new(FailingCompletion)).describe();
        assert_eq!(info.name, GENERIC);
        assert!(info.tools.is_empty());
    }
}
