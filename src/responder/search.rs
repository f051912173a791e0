//! Catalogue-backed responder.
//!
//! Pulls candidate titles (or a film id) out of the question, asks the lookup tools,
//! and answers from the first non-empty result. "Which films are streaming" questions
//! are answered from the streaming listing. Questions with no usable terms, or whose
//! terms match nothing, are handed to the fallback responder.
//!
//! All lookups for one turn share a time budget that is shorter than the hop timeout,
//! so a stalled catalogue is reported as "lookup unavailable" by the responder itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{words, Responder, ResponderInput, ResponderOutput, ResponderResult};
use crate::config::{RouterConfig, GENERIC, SEARCH};
use crate::lookup::{DataLookup, FilmRecord};
use crate::tools::{
    film_tools, ToolCall, ToolRouter, GET_FILM_BY_ID, GET_STREAMING_FILMS, SEARCH_FILMS_BY_TITLE,
};

const OUT_OF_DOMAIN: &str = "out of domain";
const NO_MATCH: &str = "out of domain: no matching film";
const LOOKUP_UNAVAILABLE: &str = "lookup unavailable";

/// Words that introduce a title.
const KEYWORDS: &[&str] = &[
    "film", "films", "movie", "movies", "dvd", "dvds", "title", "titled", "called", "named",
];

/// Skipped between a keyword and the title itself.
const FILLER: &[&str] = &[
    "the", "a", "an", "about", "called", "named", "titled", "title", "film", "movie", "dvd",
];

/// Words that end a title phrase.
const STOP: &[&str] = &[
    "is", "are", "was", "available", "for", "to", "in", "on", "at", "with", "and", "or", "that",
    "which", "rent", "rental", "rents", "cost", "costs", "streaming", "stream", "does", "do",
    "have", "has", "please", "recommended", "recommend", "worth", "by", "from", "of", "still",
    "now", "cheap",
];

/// Capitalised words that are not part of a proper noun.
const QUESTION_WORDS: &[&str] = &[
    "what", "who", "how", "is", "are", "do", "does", "did", "can", "could", "which", "when",
    "where", "why", "i", "tell", "please", "show", "find", "give", "list", "hi", "hello", "the",
];

/// Words that ask for a listing rather than one title.
const LIST_WORDS: &[&str] = &["which", "what", "list", "any", "show"];

const PLURAL_NOUNS: &[&str] = &["films", "movies", "dvds", "titles"];

const MAX_TERMS: usize = 3;

/// What the catalogue should be asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupQuery {
    Id(i64),
    /// Films available for streaming
    Streaming,
    /// Title fragments in priority order
    Titles(Vec<String>),
}

pub struct SearchResponder {
    name: String,
    fallback: String,
    description: String,
    tools: ToolRouter,
    tool_budget: Duration,
}

impl SearchResponder {
    pub fn new(tools: ToolRouter) -> Self {
        Self {
            name: SEARCH.to_string(),
            fallback: GENERIC.to_string(),
            description: "A specialized agent for film rental store queries about films, \
                          rental rates and streaming availability."
                .to_string(),
            tools,
            tool_budget: RouterConfig::default().tool_budget(),
        }
    }

    /// Search responder over the catalogue tools, with resilience from `config`.
    pub fn film_desk(lookup: Arc<dyn DataLookup>, config: &RouterConfig) -> Self {
        Self::new(ToolRouter::new(
            film_tools(lookup, config.effective_lookup_limit()),
            config,
        ))
        .with_tool_budget(config.tool_budget())
    }

    /// Total time all lookups of one turn may take.
    pub fn with_tool_budget(mut self, budget: Duration) -> Self {
        self.tool_budget = budget;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Responder that receives declined questions.
    pub fn with_fallback(mut self, target: impl Into<String>) -> Self {
        self.fallback = target.into();
        self
    }

    fn decline(
        &self,
        input: &ResponderInput<'_>,
        reason: &str,
        calls: Vec<ToolCall>,
    ) -> ResponderOutput {
        debug!(responder = %self.name, reason, "declining question");
        let result = if input.allow_handoff {
            ResponderResult::handoff(&self.fallback, reason)
        } else if reason == LOOKUP_UNAVAILABLE {
            ResponderResult::answer("The film catalogue is unavailable right now.")
        } else {
            ResponderResult::answer("I couldn't find a matching film in our catalogue.")
        };
        ResponderOutput::new(result).with_tool_calls(calls)
    }

    async fn lookup(&self, query: LookupQuery, calls: &mut Vec<ToolCall>) -> (Vec<FilmRecord>, bool) {
        let mut failed = false;
        match query {
            LookupQuery::Streaming => {
                let call = self.tools.invoke(GET_STREAMING_FILMS, json!({})).await;
                let found = call.parse_output::<Vec<FilmRecord>>();
                calls.push(call);
                match found {
                    Some(films) => (films, false),
                    None => (Vec::new(), true),
                }
            }
            LookupQuery::Id(id) => {
                let call = self.tools.invoke(GET_FILM_BY_ID, json!({ "film_id": id })).await;
                let found = call.parse_output::<Option<FilmRecord>>();
                calls.push(call);
                match found {
                    Some(film) => (film.into_iter().collect(), false),
                    None => (Vec::new(), true),
                }
            }
            LookupQuery::Titles(terms) => {
                for term in terms {
                    let call = self
                        .tools
                        .invoke(SEARCH_FILMS_BY_TITLE, json!({ "title_search": term }))
                        .await;
                    let found = call.parse_output::<Vec<FilmRecord>>();
                    calls.push(call);
                    match found {
                        Some(films) if !films.is_empty() => return (films, false),
                        Some(_) => {}
                        None => failed = true,
                    }
                }
                (Vec::new(), failed)
            }
        }
    }
}

#[async_trait]
impl Responder for SearchResponder {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn tools(&self) -> Vec<String> {
        self.tools.names().into_iter().map(String::from).collect()
    }

    async fn respond(&self, input: ResponderInput<'_>) -> ResponderOutput {
        let question = input.question.text();
        let Some(query) = extract_query(question) else {
            return self.decline(&input, OUT_OF_DOMAIN, Vec::new());
        };

        let streaming = query == LookupQuery::Streaming;
        let mut calls = Vec::new();
        let looked_up = timeout(self.tool_budget, self.lookup(query, &mut calls)).await;
        let (films, failed) = match looked_up {
            Ok(found) => found,
            Err(_) => {
                warn!(
                    responder = %self.name,
                    budget_ms = self.tool_budget.as_millis() as u64,
                    "lookups exceeded the turn budget"
                );
                (Vec::new(), true)
            }
        };

        if failed {
            return self.decline(&input, LOOKUP_UNAVAILABLE, calls);
        }
        let answer = if streaming {
            format_streaming(&films)
        } else if films.is_empty() {
            return self.decline(&input, NO_MATCH, calls);
        } else {
            format_answer(question, &films)
        };
        ResponderOutput::new(ResponderResult::answer(answer)).with_tool_calls(calls)
    }
}

fn format_streaming(films: &[FilmRecord]) -> String {
    if films.is_empty() {
        return "None of our films are available for streaming right now.".to_string();
    }
    let listed: Vec<String> = films
        .iter()
        .map(|f| format!("{} (${:.2})", f.title, f.rental_rate))
        .collect();
    format!("Films available for streaming: {}.", listed.join(", "))
}

/// Render the best match, plus streaming and recommendation notes when asked.
fn format_answer(question: &str, films: &[FilmRecord]) -> String {
    let best = &films[0];
    let mut answer = format!("Found film: {}", best.title);

    let tags: Vec<&str> = [best.category.as_deref(), best.rating.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    if !tags.is_empty() {
        answer.push_str(&format!(" ({})", tags.join(", ")));
    }
    answer.push_str(&format!(
        " rents for ${:.2} for {} days.",
        best.rental_rate, best.rental_duration
    ));

    let lower = question.to_lowercase();
    if lower.contains("stream") {
        answer.push_str(if best.streaming_available {
            " It is available for streaming."
        } else {
            " It is not available for streaming."
        });
    }
    if lower.contains("recommend") {
        answer.push_str(if best.is_recommended() {
            " It is one of our recommended picks."
        } else {
            " It is not on our recommended list."
        });
    }
    if films.len() > 1 {
        let others: Vec<&str> = films[1..].iter().map(|f| f.title.as_str()).collect();
        answer.push_str(&format!(" Other matches: {}.", others.join(", ")));
    }
    answer
}

// ===== Term extraction =====

struct Token<'a> {
    raw: &'a str,
    word: String,
    ends_clause: bool,
}

fn tokens(text: &str) -> Vec<Token<'_>> {
    text.split_whitespace()
        .filter_map(|t| {
            let raw = t.trim_matches(|c: char| !c.is_alphanumeric() && c != '-' && c != '\'');
            if raw.is_empty() {
                return None;
            }
            Some(Token {
                raw,
                word: raw.to_lowercase(),
                ends_clause: t.ends_with(['?', '.', '!', ',', ';', ':']),
            })
        })
        .collect()
}

/// Find something to look up in `text`.
///
/// An explicit film id wins, then a request for the streaming listing. Otherwise title candidates are gathered from quoted
/// text, then the words following a keyword such as "film" or "called", then runs
/// of capitalised words.
pub fn extract_query(text: &str) -> Option<LookupQuery> {
    if let Some(id) = film_id(text) {
        return Some(LookupQuery::Id(id));
    }
    if asks_for_streaming_list(text) {
        return Some(LookupQuery::Streaming);
    }

    let mut terms: Vec<String> = Vec::new();
    let candidates = quoted(text)
        .into_iter()
        .chain(after_keyword(text))
        .chain(proper_noun_runs(text));
    for term in candidates {
        let term = term.trim().to_string();
        if term.chars().count() < 2 || terms.iter().any(|t| t.eq_ignore_ascii_case(&term)) {
            continue;
        }
        terms.push(term);
        if terms.len() == MAX_TERMS {
            break;
        }
    }

    (!terms.is_empty()).then_some(LookupQuery::Titles(terms))
}

fn film_id(text: &str) -> Option<i64> {
    let lower = text.to_lowercase();
    for marker in ["film #", "film id", "film no."] {
        let Some(pos) = lower.find(marker) else {
            continue;
        };
        let rest = lower[pos + marker.len()..].trim_start_matches([' ', ':', '#']);
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(id) = digits.parse::<i64>() {
            if id > 0 {
                return Some(id);
            }
        }
    }
    None
}

/// "Which films can I stream?" and the like.
fn asks_for_streaming_list(text: &str) -> bool {
    let seen: Vec<String> = words(text).collect();
    let has = |set: &[&str]| seen.iter().any(|w| set.contains(&w.as_str()));
    seen.iter().any(|w| w.starts_with("stream")) && has(LIST_WORDS) && has(PLURAL_NOUNS)
}

fn quoted(text: &str) -> Vec<String> {
    let pieces: Vec<&str> = text.split(['"', '“', '”']).collect();
    (1..pieces.len())
        .step_by(2)
        // an unbalanced trailing quote is not a title
        .filter(|&i| i + 1 < pieces.len())
        .map(|i| pieces[i].trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn after_keyword(text: &str) -> Vec<String> {
    let toks = tokens(text);
    let mut out = Vec::new();
    for (i, tok) in toks.iter().enumerate() {
        if !KEYWORDS.contains(&tok.word.as_str()) || tok.ends_clause {
            continue;
        }
        let mut j = i + 1;
        while j < toks.len() && FILLER.contains(&toks[j].word.as_str()) && !toks[j].ends_clause {
            j += 1;
        }
        let mut phrase: Vec<&str> = Vec::new();
        while j < toks.len() && phrase.len() < 4 && !STOP.contains(&toks[j].word.as_str()) {
            phrase.push(toks[j].raw);
            if toks[j].ends_clause {
                break;
            }
            j += 1;
        }
        if !phrase.is_empty() {
            out.push(phrase.join(" "));
        }
    }
    out
}

fn proper_noun_runs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut run: Vec<&str> = Vec::new();
    for tok in tokens(text) {
        let capitalised = tok.raw.chars().next().is_some_and(char::is_uppercase)
            && !QUESTION_WORDS.contains(&tok.word.as_str())
            && !KEYWORDS.contains(&tok.word.as_str());
        if capitalised {
            run.push(tok.raw);
        }
        if (!capitalised || tok.ends_clause) && !run.is_empty() {
            out.push(run.join(" "));
            run.clear();
        }
    }
    if !run.is_empty() {
        out.push(run.join(" "));
    }
    out
}
