//! Orchestration runtime
//!
//! [`Orchestrator::process`] drives one question through the responders:
//!
//! ```text
//! Routing(entry) ──Final──────────────────────────────▶ Completed
//!      │
//!      └─Handoff(target)─┬─ permitted, hops left ─────▶ Routing(target)
//!                        └─ refused / exhausted / hop timeout ─▶ Failed
//! Failed ── fallback best-effort answer ──────────────▶ Outcome (degraded)
//! ```
//!
//! Every question gets its own [`ExecutionContext`], which reports an
//! [`ExecutionSummary`] to the sink when it is dropped. That covers every exit path,
//! including cancellation and the caller dropping the `process` future.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{sleep_until, timeout, Instant};
use tower::{BoxError, Service};
use tracing::{error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::completion::Completion;
use crate::config::{GraphConfig, RouterConfig, GENERIC, SEARCH};
use crate::error::{Result, RouterError};
use crate::graph::HandoffGraph;
use crate::lookup::DataLookup;
use crate::registry::CapabilityRegistry;
use crate::responder::{
    GenericResponder, ResponderInfo, ResponderInput, ResponderResult, SearchResponder,
    DEGRADED_ANSWER,
};
use crate::tools::{ToolCall, GET_FILM_BY_ID, GET_STREAMING_FILMS, SEARCH_FILMS_BY_TITLE};
use crate::transcript::{
    ExecutionSummary, ExitPath, Message, Question, SharedSink, Transcript, TracingSink,
    TranscriptSink,
};

// ===== Outcome =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// A responder returned a final answer
    Completed,
    /// Routing failed; the answer is the fallback's best effort
    Degraded,
    /// Cancelled or past the request deadline; the answer is empty
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeMetadata {
    pub request_id: Uuid,
    /// Accepted handoffs
    pub hops: usize,
    #[serde(with = "crate::config::duration_ms")]
    pub duration: Duration,
    pub status: OutcomeStatus,
    pub error: Option<String>,
    pub transcript: Transcript,
}

/// Final result of one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    /// Responder the answer is attributed to
    pub agent: String,
    pub answer: String,
    pub metadata: OutcomeMetadata,
}

impl Outcome {
    pub fn status(&self) -> OutcomeStatus {
        self.metadata.status
    }

    pub fn hops(&self) -> usize {
        self.metadata.hops
    }

    pub fn is_cancelled(&self) -> bool {
        self.metadata.status == OutcomeStatus::Cancelled
    }
}

// ===== Cancellation =====

/// Cooperative cancellation shared between a caller and an in-flight question.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            // The token owns a sender, so the channel cannot close under us.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

// ===== Execution context =====

struct ExecutionContext {
    request_id: Uuid,
    active: String,
    transcript: Transcript,
    message_count: usize,
    hops_remaining: usize,
    hops: usize,
    started: Instant,
    exit: ExitPath,
    sink: SharedSink,
}

impl ExecutionContext {
    fn new(request_id: Uuid, entry: String, max_hops: usize, sink: SharedSink) -> Self {
        Self {
            request_id,
            active: entry,
            transcript: Transcript::new(),
            message_count: 0,
            hops_remaining: max_hops,
            hops: 0,
            started: Instant::now(),
            exit: ExitPath::Aborted,
            sink,
        }
    }

    fn append(&mut self, message: Message) {
        self.sink.on_message(self.request_id, &message);
        self.transcript.push(message);
        self.message_count += 1;
    }

    fn finish(
        &mut self,
        agent: String,
        answer: String,
        status: OutcomeStatus,
        error: Option<String>,
    ) -> Outcome {
        self.exit = match status {
            OutcomeStatus::Completed => ExitPath::Completed,
            OutcomeStatus::Degraded => ExitPath::Degraded,
            OutcomeStatus::Cancelled => ExitPath::Cancelled,
        };
        Outcome {
            agent,
            answer,
            metadata: OutcomeMetadata {
                request_id: self.request_id,
                hops: self.hops,
                duration: self.started.elapsed(),
                status,
                error,
                transcript: std::mem::take(&mut self.transcript),
            },
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.sink.on_release(&ExecutionSummary {
            request_id: self.request_id,
            exit: self.exit,
            active: self.active.clone(),
            hops: self.hops,
            messages: self.message_count,
            elapsed: self.started.elapsed(),
        });
    }
}

/// How the routing loop ended, before it becomes an [`Outcome`].
struct Terminal {
    agent: String,
    answer: String,
    status: OutcomeStatus,
    error: Option<String>,
}

// ===== Orchestrator =====

struct Inner {
    registry: CapabilityRegistry,
    graph: HandoffGraph,
    config: RouterConfig,
    sink: SharedSink,
}

/// Routes questions through the registered responders. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

pub struct OrchestratorBuilder {
    registry: CapabilityRegistry,
    graph: HandoffGraph,
    config: RouterConfig,
    sink: SharedSink,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sink<S: TranscriptSink>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn shared_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Check the wiring once so request-time configuration errors cannot happen
    /// with this registry and graph.
    pub fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;
        self.registry.resolve(self.registry.entry_point()?)?;
        self.registry.resolve(self.registry.fallback()?)?;
        for edge in self.graph.edges() {
            self.registry.resolve(&edge.source)?;
            self.registry.resolve(&edge.target)?;
        }
        info!(
            responders = ?self.registry.names(),
            edges = self.graph.edges().len(),
            max_hops = self.config.max_hops,
            "orchestrator ready"
        );
        Ok(Orchestrator {
            inner: Arc::new(Inner {
                registry: self.registry,
                graph: self.graph,
                config: self.config,
                sink: self.sink,
            }),
        })
    }
}

impl Orchestrator {
    pub fn builder(registry: CapabilityRegistry, graph: HandoffGraph) -> OrchestratorBuilder {
        OrchestratorBuilder {
            registry,
            graph,
            config: RouterConfig::default(),
            sink: Arc::new(TracingSink),
        }
    }

    /// The default two-responder film desk: catalogue search first, general
    /// knowledge as fallback, each allowed to defer to the other.
    pub fn film_desk(
        lookup: Arc<dyn DataLookup>,
        completion: Arc<dyn Completion>,
        config: RouterConfig,
    ) -> Result<OrchestratorBuilder> {
        let routing = GraphConfig::film_desk();
        // generic defers along its configured edge
        let catalogue = routing
            .edges
            .iter()
            .find(|e| e.source == GENERIC)
            .map_or(SEARCH, |e| e.target.as_str());

        let mut registry = CapabilityRegistry::new();
        let search = SearchResponder::film_desk(lookup, &config).with_fallback(&routing.fallback);
        registry.register(
            SEARCH,
            [SEARCH_FILMS_BY_TITLE, GET_FILM_BY_ID, GET_STREAMING_FILMS],
            Arc::new(search),
        )?;
        registry.register(
            GENERIC,
            Vec::<String>::new(),
            Arc::new(GenericResponder::new(completion).with_search(catalogue)),
        )?;
        registry.configure(&routing)?;
        let graph = HandoffGraph::from_config(&routing, &registry)?;
        Ok(Self::builder(registry, graph).config(config))
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.inner.registry
    }

    pub fn graph(&self) -> &HandoffGraph {
        &self.inner.graph
    }

    pub fn describe(&self) -> Vec<ResponderInfo> {
        self.inner.registry.describe()
    }

    /// Answer one question.
    ///
    /// Routing and collaborator failures come back as a degraded [`Outcome`]; `Err`
    /// is reserved for wiring mistakes discovered at request time.
    pub async fn process(&self, question: impl Into<Question>) -> Result<Outcome> {
        self.process_with_cancel(question, CancelToken::new()).await
    }

    /// Like [`Orchestrator::process`], stopping early when `cancel` fires or the
    /// configured request deadline passes. Either way the outcome is `Cancelled`.
    pub async fn process_with_cancel(
        &self,
        question: impl Into<Question>,
        cancel: CancelToken,
    ) -> Result<Outcome> {
        let question = question.into();
        let request_id = Uuid::new_v4();
        let span = info_span!("process", %request_id);
        self.run(question, request_id, cancel).instrument(span).await
    }

    async fn run(&self, question: Question, request_id: Uuid, cancel: CancelToken) -> Result<Outcome> {
        let inner = &self.inner;
        let entry = inner.registry.entry_point()?.to_string();
        let mut ctx = ExecutionContext::new(
            request_id,
            entry.clone(),
            inner.config.max_hops,
            inner.sink.clone(),
        );
        info!(entry = %entry, "🚀 routing question");
        ctx.append(Message::system(format!("question: {}", question.text())));

        let deadline = inner.config.request_deadline.map(|d| ctx.started + d);
        let interrupted = async {
            tokio::select! {
                _ = cancel.cancelled() => "cancelled",
                _ = deadline_elapsed(deadline) => "request deadline exceeded",
            }
        };

        let routed = {
            let routing = self.route(&question, &mut ctx);
            tokio::select! {
                biased;
                reason = interrupted => Err(reason),
                terminal = routing => Ok(terminal),
            }
        };

        match routed {
            Ok(Ok(t)) => {
                let outcome = ctx.finish(t.agent, t.answer, t.status, t.error);
                info!(
                    agent = %outcome.agent,
                    hops = outcome.metadata.hops,
                    status = ?outcome.metadata.status,
                    duration_ms = outcome.metadata.duration.as_millis() as u64,
                    "✅ question resolved"
                );
                Ok(outcome)
            }
            Ok(Err(e)) => {
                error!(error = %e, "configuration error at request time");
                Err(e)
            }
            Err(reason) => {
                warn!(active = %ctx.active, reason, "question cancelled");
                ctx.append(Message::system(reason));
                let agent = ctx.active.clone();
                Ok(ctx.finish(
                    agent,
                    String::new(),
                    OutcomeStatus::Cancelled,
                    Some(reason.to_string()),
                ))
            }
        }
    }

    #[instrument(level = "debug", skip_all, fields(entry = %ctx.active))]
    async fn route(&self, question: &Question, ctx: &mut ExecutionContext) -> Result<Terminal> {
        let inner = &self.inner;
        let hop_timeout = inner.config.hop_timeout;
        loop {
            let active = ctx.active.clone();
            let responder = inner.registry.resolve(&active)?;

            let turn = timeout(
                hop_timeout,
                responder.respond(ResponderInput::new(question, &ctx.transcript)),
            )
            .await;
            let output = match turn {
                Ok(output) => output,
                Err(_) => {
                    let err = RouterError::timeout(hop_timeout);
                    warn!(responder = %active, error = %err, "hop timed out");
                    ctx.append(Message::system(format!("{active} failed: {err}")));
                    let fallback_timed_out = inner.registry.fallback()? == active;
                    return self.degrade(question, ctx, err, fallback_timed_out).await;
                }
            };

            self.check_tools(&active, &output.tool_calls)?;
            for call in &output.tool_calls {
                ctx.append(Message::tool(active.as_str(), call));
            }

            match output.result {
                ResponderResult::Final { answer } => {
                    ctx.append(Message::content(active.as_str(), answer.as_str()));
                    return Ok(Terminal {
                        agent: active,
                        answer,
                        status: OutcomeStatus::Completed,
                        error: None,
                    });
                }
                ResponderResult::Handoff { target, reason } => {
                    let accepted = inner.graph.check(&active, &target).and_then(|_| {
                        if ctx.hops_remaining == 0 {
                            Err(RouterError::HopsExhausted {
                                max_hops: inner.config.max_hops,
                            })
                        } else {
                            Ok(())
                        }
                    });
                    match accepted {
                        Ok(()) => {
                            ctx.hops_remaining -= 1;
                            ctx.hops += 1;
                            ctx.append(Message::handoff(&active, &target, &reason));
                            info!("🔄 Handoff: {} → {} ({})", active, target, reason);
                            ctx.active = target;
                        }
                        Err(err) => {
                            warn!(source = %active, target = %target, error = %err, "handoff refused");
                            ctx.append(Message::system(format!(
                                "handoff {active} -> {target} refused: {err}"
                            )));
                            return self.degrade(question, ctx, err, false).await;
                        }
                    }
                }
            }
        }
    }

    /// Failed state: ask the fallback for a best-effort answer for the incoming
    /// question. When the fallback is the responder that just timed out, use the
    /// static answer instead so the question does not wait a second hop timeout.
    #[instrument(level = "debug", skip(self, question, ctx, err), fields(cause = %err))]
    async fn degrade(
        &self,
        question: &Question,
        ctx: &mut ExecutionContext,
        err: RouterError,
        skip_fallback: bool,
    ) -> Result<Terminal> {
        let inner = &self.inner;
        let fallback = inner.registry.fallback()?.to_string();
        let responder = inner.registry.resolve(&fallback)?;
        ctx.active = fallback.clone();

        let answer = if skip_fallback {
            DEGRADED_ANSWER.to_string()
        } else {
            let turn = timeout(
                inner.config.hop_timeout,
                responder.respond(ResponderInput::best_effort(question, &ctx.transcript)),
            )
            .await;
            match turn {
                Ok(output) => {
                    self.check_tools(&fallback, &output.tool_calls)?;
                    for call in &output.tool_calls {
                        ctx.append(Message::tool(fallback.as_str(), call));
                    }
                    match output.result {
                        ResponderResult::Final { answer } => answer,
                        ResponderResult::Handoff { target, .. } => {
                            warn!(responder = %fallback, target = %target, "fallback handed off during best-effort turn");
                            DEGRADED_ANSWER.to_string()
                        }
                    }
                }
                Err(_) => {
                    warn!(responder = %fallback, "fallback timed out");
                    DEGRADED_ANSWER.to_string()
                }
            }
        };

        ctx.append(Message::content(fallback.as_str(), answer.as_str()));
        Ok(Terminal {
            agent: fallback,
            answer,
            status: OutcomeStatus::Degraded,
            error: Some(err.to_string()),
        })
    }

    /// Tool calls must stay within what the responder was registered with.
    fn check_tools(&self, responder: &str, calls: &[ToolCall]) -> Result<()> {
        let declared = self.inner.registry.declared_tools(responder)?;
        match calls.iter().find(|c| !declared.contains(&c.name)) {
            Some(call) => Err(RouterError::UndeclaredTool {
                responder: responder.to_string(),
                tool: call.name.clone(),
            }),
            None => Ok(()),
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Service<Question> for Orchestrator {
    type Response = Outcome;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Outcome, BoxError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, question: Question) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.process(question).await.map_err(BoxError::from) })
    }
}
