//! End-to-end routing scenarios for the film desk.
//!
//! Each test builds a small orchestration from deterministic fakes and checks the
//! attributed answer, hop count and outcome status.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tower_handoff::completion::{FailingCompletion, FixedCompletion, HangingCompletion};
use tower_handoff::lookup::{sample_films, DataLookup, FilmRecord, InMemoryCatalog, SqliteCatalog};
use tower_handoff::{
    CapabilityRegistry, CollectingSink, GenericResponder, HandoffGraph, Orchestrator,
    OutcomeStatus, Responder, ResponderInput, ResponderOutput, ResponderResult, Role,
    RouterConfig, SearchResponder, DEGRADED_ANSWER, GENERIC, SEARCH,
};

const FIFA: &str = "Who won the FIFA World Cup in 2022?";
const ALIEN: &str = "What is the rental rate for the film Alien?";

fn alien_only() -> Arc<InMemoryCatalog> {
    Arc::new(InMemoryCatalog::new(vec![FilmRecord {
        film_id: 15,
        title: "ALIEN CENTER".to_string(),
        description: None,
        release_year: Some(2006),
        category: Some("Foreign".to_string()),
        rating: Some("NC-17".to_string()),
        rental_rate: 2.99,
        rental_duration: 5,
        length: Some(46),
        streaming_available: true,
    }]))
}

fn desk_with(
    completion: Arc<dyn tower_handoff::completion::Completion>,
    config: RouterConfig,
) -> Orchestrator {
    Orchestrator::film_desk(alien_only(), completion, config)
        .unwrap()
        .build()
        .unwrap()
}

fn desk() -> Orchestrator {
    desk_with(
        Arc::new(FixedCompletion::new("Argentina won the 2022 World Cup.")),
        RouterConfig::default(),
    )
}

#[tokio::test]
async fn test_in_domain_question_is_answered_by_search() {
    let outcome = desk().process(ALIEN).await.unwrap();

    assert_eq!(outcome.agent, SEARCH);
    assert!(outcome.answer.contains("2.99"), "{}", outcome.answer);
    assert_eq!(outcome.hops(), 0);
    assert_eq!(outcome.status(), OutcomeStatus::Completed);
    assert!(outcome.metadata.error.is_none());

    let roles: Vec<Role> = outcome
        .metadata
        .transcript
        .messages()
        .iter()
        .map(|m| m.role)
        .collect();
    assert_eq!(roles, vec![Role::Instruction, Role::Tool, Role::Content]);
}

#[tokio::test]
async fn test_out_of_domain_question_takes_exactly_one_handoff() {
    let outcome = desk().process(FIFA).await.unwrap();

    assert_eq!(outcome.agent, GENERIC);
    assert_eq!(outcome.hops(), 1);
    assert!(!outcome.answer.is_empty());
    assert_eq!(outcome.status(), OutcomeStatus::Completed);

    let handoffs: Vec<_> = outcome.metadata.transcript.handoffs().collect();
    assert_eq!(handoffs.len(), 1);
    assert_eq!(handoffs[0].author, SEARCH);
    assert!(handoffs[0].text.starts_with("handoff to generic"));
}

#[tokio::test]
async fn test_generic_entry_defers_catalogue_questions_to_search() {
    let mut registry = CapabilityRegistry::new();
    let config = RouterConfig::default();
    registry
        .register_responder(Arc::new(SearchResponder::film_desk(alien_only(), &config)))
        .unwrap();
    registry
        .register_responder(Arc::new(GenericResponder::new(Arc::new(
            FixedCompletion::new("general"),
        ))))
        .unwrap();
    registry.set_entry_point(GENERIC).unwrap();
    registry.set_fallback(GENERIC).unwrap();
    let graph = HandoffGraph::builder()
        .edge(GENERIC, SEARCH, "needs catalogue data")
        .edge(SEARCH, GENERIC, "not about films")
        .build(&registry)
        .unwrap();
    let orchestrator = Orchestrator::builder(registry, graph)
        .config(config)
        .build()
        .unwrap();

    let outcome = orchestrator.process(ALIEN).await.unwrap();
    assert_eq!(outcome.agent, SEARCH);
    assert_eq!(outcome.hops(), 1);
    assert!(outcome.answer.contains("ALIEN CENTER"));
}

#[tokio::test]
async fn test_missing_edge_degrades_to_fallback() {
    let config = RouterConfig::default();
    let mut registry = CapabilityRegistry::new();
    registry
        .register_responder(Arc::new(SearchResponder::film_desk(alien_only(), &config)))
        .unwrap();
    registry
        .register_responder(Arc::new(GenericResponder::new(Arc::new(
            FixedCompletion::new("best effort"),
        ))))
        .unwrap();
    registry.set_entry_point(SEARCH).unwrap();
    registry.set_fallback(GENERIC).unwrap();
    // no search -> generic edge
    let graph = HandoffGraph::builder()
        .edge(GENERIC, SEARCH, "needs catalogue data")
        .build(&registry)
        .unwrap();
    let orchestrator = Orchestrator::builder(registry, graph).build().unwrap();

    let outcome = orchestrator.process(FIFA).await.unwrap();
    assert_eq!(outcome.agent, GENERIC);
    assert_eq!(outcome.answer, "best effort");
    assert_eq!(outcome.status(), OutcomeStatus::Degraded);
    assert_eq!(outcome.hops(), 0);
    assert!(outcome
        .metadata
        .error
        .as_deref()
        .unwrap()
        .contains("Invalid handoff: search -> generic"));
}

/// Always defers to `next` unless it is asked for a best-effort answer.
struct Relay {
    name: &'static str,
    next: &'static str,
}

#[async_trait]
impl Responder for Relay {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "hands everything to its neighbour"
    }
    fn tools(&self) -> Vec<String> {
        Vec::new()
    }
    async fn respond(&self, input: ResponderInput<'_>) -> ResponderOutput {
        let result = if input.allow_handoff {
            ResponderResult::handoff(self.next, "not mine")
        } else {
            ResponderResult::answer(format!("{} gave up", self.name))
        };
        ResponderOutput::new(result)
    }
}

#[tokio::test]
async fn test_two_cycle_is_bounded_by_max_hops() {
    let mut registry = CapabilityRegistry::new();
    registry
        .register_responder(Arc::new(Relay { name: "a", next: "b" }))
        .unwrap();
    registry
        .register_responder(Arc::new(Relay { name: "b", next: "a" }))
        .unwrap();
    registry.set_entry_point("a").unwrap();
    registry.set_fallback("b").unwrap();
    let graph = HandoffGraph::builder()
        .edge("a", "b", "always")
        .edge("b", "a", "always")
        .build(&registry)
        .unwrap();

    let sink = CollectingSink::new();
    let orchestrator = Orchestrator::builder(registry, graph)
        .config(RouterConfig::default().with_max_hops(5))
        .sink(sink.clone())
        .build()
        .unwrap();

    let outcome = orchestrator.process("anything").await.unwrap();
    assert_eq!(outcome.hops(), 5);
    assert_eq!(outcome.agent, "b");
    assert_eq!(outcome.answer, "b gave up");
    assert_eq!(outcome.status(), OutcomeStatus::Degraded);
    assert_eq!(
        outcome.metadata.error.as_deref(),
        Some("Maximum hops exceeded: 5")
    );
    assert_eq!(sink.releases()[0].hops, 5);
}

#[tokio::test]
async fn test_same_question_routes_the_same_way() {
    let orchestrator = desk();
    for question in [ALIEN, FIFA] {
        let first = orchestrator.process(question).await.unwrap();
        let second = orchestrator.process(question).await.unwrap();
        assert_eq!(first.agent, second.agent);
        assert_eq!(first.answer, second.answer);
        assert_ne!(first.metadata.request_id, second.metadata.request_id);
    }
}

#[tokio::test]
async fn test_hanging_completion_returns_within_hop_timeout() {
    let hop_timeout = Duration::from_millis(100);
    let orchestrator = desk_with(
        Arc::new(HangingCompletion),
        RouterConfig::default().with_hop_timeout(hop_timeout),
    );

    let started = Instant::now();
    let outcome = orchestrator.process(FIFA).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < hop_timeout + Duration::from_millis(400), "{elapsed:?}");
    assert_eq!(outcome.agent, GENERIC);
    assert_eq!(outcome.answer, DEGRADED_ANSWER);
    assert_eq!(outcome.status(), OutcomeStatus::Degraded);
    assert!(outcome.metadata.error.as_deref().unwrap().contains("Timed out"));
}

#[tokio::test]
async fn test_unavailable_completion_degrades_inside_the_responder() {
    let orchestrator = desk_with(Arc::new(FailingCompletion), RouterConfig::default());
    let outcome = orchestrator.process(FIFA).await.unwrap();

    assert_eq!(outcome.agent, GENERIC);
    assert_eq!(outcome.answer, DEGRADED_ANSWER);
    // the responder recovered, so routing itself completed
    assert_eq!(outcome.status(), OutcomeStatus::Completed);
}

#[tokio::test]
async fn test_sqlite_catalogue_end_to_end() {
    let catalog = SqliteCatalog::new_in_memory().await.unwrap();
    catalog.seed(&sample_films()).await.unwrap();

    let orchestrator = Orchestrator::film_desk(
        Arc::new(catalog),
        Arc::new(FixedCompletion::new("general")),
        RouterConfig::default(),
    )
    .unwrap()
    .build()
    .unwrap();

    let outcome = orchestrator
        .process("Is the movie Alien Center available for streaming?")
        .await
        .unwrap();
    assert_eq!(outcome.agent, SEARCH);
    assert!(outcome.answer.contains("available for streaming"));

    let outcome = orchestrator.process("Tell me about film #1").await.unwrap();
    assert_eq!(outcome.agent, SEARCH);
    assert!(outcome.answer.contains("ACADEMY DINOSAUR"));
}

#[tokio::test]
async fn test_streaming_listing_is_answered_from_the_catalogue() {
    let orchestrator = Orchestrator::film_desk(
        Arc::new(InMemoryCatalog::sample()),
        Arc::new(FixedCompletion::new("LLM guess")),
        RouterConfig::default(),
    )
    .unwrap()
    .build()
    .unwrap();

    let outcome = orchestrator
        .process("Which films are available for streaming?")
        .await
        .unwrap();
    assert_eq!(outcome.agent, SEARCH);
    assert_eq!(outcome.hops(), 0);
    assert_ne!(outcome.answer, "LLM guess");
    assert!(outcome.answer.contains("CHAMBER ITALIAN"), "{}", outcome.answer);
    assert!(!outcome.answer.contains("ZHIVAGO CORE"));
}

/// Catalogue that never answers.
struct StalledCatalog;

#[async_trait]
impl DataLookup for StalledCatalog {
    async fn find_by_title(
        &self,
        _text: &str,
        _limit: usize,
    ) -> tower_handoff::Result<Vec<FilmRecord>> {
        std::future::pending().await
    }
    async fn get_by_id(&self, _id: i64) -> tower_handoff::Result<Option<FilmRecord>> {
        std::future::pending().await
    }
    async fn streaming(&self, _limit: usize) -> tower_handoff::Result<Vec<FilmRecord>> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_stalled_catalogue_hands_off_instead_of_timing_out() {
    let config = RouterConfig::default()
        .with_hop_timeout(Duration::from_millis(300))
        .with_tool_timeout(Duration::from_millis(100))
        .with_tool_retries(1);
    let orchestrator = Orchestrator::film_desk(
        Arc::new(StalledCatalog),
        Arc::new(FixedCompletion::new("general answer")),
        config,
    )
    .unwrap()
    .build()
    .unwrap();

    let outcome = orchestrator.process(ALIEN).await.unwrap();
    assert_eq!(outcome.agent, GENERIC);
    assert_eq!(outcome.answer, "general answer");
    assert_eq!(outcome.status(), OutcomeStatus::Completed);
    assert_eq!(outcome.hops(), 1);
    assert!(outcome.metadata.error.is_none());
    let handoffs: Vec<_> = outcome.metadata.transcript.handoffs().collect();
    assert_eq!(handoffs[0].text, "handoff to generic: lookup unavailable");
}

#[test]
fn test_describe_lists_responders_and_tools() {
    let info = desk().describe();
    assert_eq!(info.len(), 2);
    assert_eq!(info[0].name, SEARCH);
    assert_eq!(
        info[0].tools,
        vec!["search_films_by_title", "get_film_by_id", "get_streaming_films"]
    );
    assert!(info[1].tools.is_empty());
}
