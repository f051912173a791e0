//! # tower-handoff
//!
//! Question routing with bounded handoffs between specialised responders, built on
//! Tower services.
//!
//! ## Core Concepts
//!
//! - **Responder**: answers a question or hands it off to another responder, as a
//!   return value ([`ResponderResult`]) rather than an error
//! - **Capability registry**: the responders, their declared tools, the entry point
//!   and the fallback
//! - **Handoff graph**: static, permitted responder → responder edges; cycles are fine
//! - **Orchestrator**: the per-question state machine with a hop budget, per-hop
//!   timeouts, cancellation and guaranteed context release
//! - **Tools**: typed Tower services over external collaborators, wrapped with
//!   timeout and retry layers
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tower_handoff::{
//!     completion::FixedCompletion, lookup::InMemoryCatalog, Orchestrator, RouterConfig,
//! };
//!
//! # async fn example() -> tower_handoff::Result<()> {
//! let desk = Orchestrator::film_desk(
//!     Arc::new(InMemoryCatalog::sample()),
//!     Arc::new(FixedCompletion::new("I can only talk about films offline.")),
//!     RouterConfig::default(),
//! )?
//! .build()?;
//!
//! let outcome = desk.process("What is the rental rate for the film Alien?").await?;
//! assert_eq!(outcome.agent, "search");
//! println!("{}", outcome.answer);
//! # Ok(())
//! # }
//! ```

pub mod completion;
pub mod config;
pub mod error;
pub mod graph;
pub mod lookup;
pub mod registry;
pub mod resilience;
pub mod responder;
pub mod runtime;
pub mod tools;
pub mod transcript;

pub use config::{EdgeConfig, GraphConfig, RouterConfig, GENERIC, SEARCH};
pub use error::{Result, RouterError};
pub use graph::{HandoffEdge, HandoffGraph, HandoffGraphBuilder};
pub use registry::{CapabilityRegistry, SharedResponder};
pub use responder::{
    GenericResponder, Responder, ResponderInfo, ResponderInput, ResponderOutput, ResponderResult,
    SearchResponder, DEGRADED_ANSWER,
};
pub use runtime::{
    CancelToken, Orchestrator, OrchestratorBuilder, Outcome, OutcomeMetadata, OutcomeStatus,
};
pub use tools::{tool_typed, ToolCall, ToolDef, ToolInvocation, ToolOutput, ToolResult, ToolRouter, ToolSvc};
pub use transcript::{
    CollectingSink, ExecutionSummary, ExitPath, Message, NoopSink, Question, Role, SharedSink,
    TracingSink, Transcript, TranscriptSink,
};

// Re-export Tower traits that users need
pub use tower::{BoxError, Layer, Service, ServiceExt};
