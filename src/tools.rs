//! Tool functions that responders invoke against external collaborators.
//!
//! A tool is a boxed, clonable Tower service from [`ToolInvocation`] to [`ToolOutput`].
//! [`ToolRouter`] owns a name → service table, wraps every service with the
//! resilience layers, and turns each call into a [`ToolCall`] record. Failures end up
//! inside the record, never as a raw error, so responders can decide how to degrade.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::{util::BoxCloneSyncService, BoxError, Service, ServiceBuilder, ServiceExt};
use tracing::debug;
use uuid::Uuid;

use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::lookup::DataLookup;
use crate::resilience::{Backoff, RetryLayer, RetryPolicy, TimeoutLayer};

pub const SEARCH_FILMS_BY_TITLE: &str = "search_films_by_title";
pub const GET_FILM_BY_ID: &str = "get_film_by_id";
pub const GET_STREAMING_FILMS: &str = "get_streaming_films";

/// Hard cap on rows any catalogue tool may return.
pub const MAX_LOOKUP_LIMIT: usize = 100;

/// Rows returned by [`GET_STREAMING_FILMS`] when no limit is given.
pub const STREAMING_DEFAULT_LIMIT: usize = 10;

// =============================
// Tool service modeling
// =============================

/// Uniform tool invocation passed to routed tool services.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Uniform tool output produced by tool services.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub id: String, // same as invocation.id
    pub result: Value,
}

/// Shared by every in-flight question, so the boxed service must be `Sync` as well.
pub type ToolSvc = BoxCloneSyncService<ToolInvocation, ToolOutput, BoxError>;

/// Definition of a tool: name, argument schema and service implementation.
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters_schema: Value,
    pub service: ToolSvc,
}

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

impl ToolDef {
    /// Create a tool definition from a handler that takes JSON args and returns JSON.
    pub fn from_handler(
        name: &'static str,
        description: &'static str,
        parameters_schema: Value,
        handler: Handler,
    ) -> Self {
        let svc = tower::service_fn(move |inv: ToolInvocation| {
            let handler = handler.clone();
            async move {
                if inv.name != name {
                    return Err::<ToolOutput, BoxError>(
                        format!("routed to wrong tool: expected={}, got={}", name, inv.name).into(),
                    );
                }
                let out = (handler)(inv.arguments).await?;
                Ok(ToolOutput {
                    id: inv.id,
                    result: out,
                })
            }
        });
        Self {
            name,
            description,
            parameters_schema,
            service: BoxCloneSyncService::new(svc),
        }
    }
}

/// Create a tool from a typed handler.
/// - `A` is the argument struct (Deserialize + JsonSchema)
/// - `R` is the output type (Serialize)
pub fn tool_typed<A, H, Fut, R>(name: &'static str, description: &'static str, handler: H) -> ToolDef
where
    A: DeserializeOwned + JsonSchema + Send + 'static,
    R: Serialize + Send + 'static,
    H: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
{
    let schema = schemars::schema_for!(A);
    let params_value = serde_json::to_value(schema.schema).unwrap_or_else(|_| json!({}));
    let handler = Arc::new(handler);
    let erased: Handler = Arc::new(move |raw: Value| -> BoxFuture<'static, Result<Value, BoxError>> {
        let h = handler.clone();
        Box::pin(async move {
            let args: A = serde_json::from_value(raw).map_err(|e| RouterError::InvalidArgument {
                message: e.to_string(),
            })?;
            let out: R = (h.as_ref())(args).await?;
            Ok(serde_json::to_value(out)?)
        })
    });
    ToolDef::from_handler(name, description, params_value, erased)
}

// =============================
// Call records
// =============================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum ToolResult {
    Ok(String),
    Err(String),
}

/// A resolved tool call, kept in the transcript after the responder turn ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
    pub result: ToolResult,
}

impl ToolCall {
    pub fn is_ok(&self) -> bool {
        matches!(self.result, ToolResult::Ok(_))
    }

    /// Decode a successful JSON result.
    pub fn parse_output<T: DeserializeOwned>(&self) -> Option<T> {
        match &self.result {
            ToolResult::Ok(text) => serde_json::from_str(text).ok(),
            ToolResult::Err(_) => None,
        }
    }

    /// One-line rendering used for transcript messages.
    pub fn summary(&self) -> String {
        let (status, text) = match &self.result {
            ToolResult::Ok(t) => ("ok", t),
            ToolResult::Err(t) => ("error", t),
        };
        format!(
            "{}({}) -> {}: {}",
            self.name,
            self.arguments,
            status,
            truncate(text, 160)
        )
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

// =============================
// Router
// =============================

/// Name → service table. Index 0 is the unknown-tool fallback.
#[derive(Clone)]
pub struct ToolRouter {
    name_to_index: HashMap<&'static str, usize>,
    services: Vec<ToolSvc>,
    catalog: Vec<(&'static str, &'static str)>,
}

impl ToolRouter {
    /// Build a router, wrapping each tool with a per-attempt timeout inside a retry.
    pub fn new(tools: Vec<ToolDef>, config: &RouterConfig) -> Self {
        let unknown = BoxCloneSyncService::new(tower::service_fn(|inv: ToolInvocation| async move {
            Err::<ToolOutput, BoxError>(Box::new(RouterError::InvalidArgument {
                message: format!("unknown tool: {}", inv.name),
            }))
        }));

        let retry = match config.tool_retries {
            0 => RetryPolicy::none(),
            max_retries => RetryPolicy {
                max_retries,
                backoff: Backoff::exponential(
                    Duration::from_millis(50),
                    2.0,
                    Duration::from_secs(1),
                ),
            },
        };

        let mut services: Vec<ToolSvc> = vec![unknown];
        let mut name_to_index = HashMap::new();
        let mut catalog = Vec::with_capacity(tools.len());

        for (i, td) in tools.into_iter().enumerate() {
            name_to_index.insert(td.name, i + 1);
            catalog.push((td.name, td.description));
            let layered = ServiceBuilder::new()
                .layer(RetryLayer::new(retry))
                .layer(TimeoutLayer::new(config.tool_timeout))
                .service(td.service);
            services.push(BoxCloneSyncService::new(layered));
        }

        Self {
            name_to_index,
            services,
            catalog,
        }
    }

    /// Router with no tools; every call resolves to an "unknown tool" error.
    pub fn empty() -> Self {
        Self::new(Vec::new(), &RouterConfig::default())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.catalog.iter().map(|(name, _)| *name).collect()
    }

    fn select(&self, name: &str) -> ToolSvc {
        let idx = self.name_to_index.get(name).copied().unwrap_or(0);
        self.services[idx].clone()
    }

    /// Run one tool and record the outcome. Takes `&self` so concurrent questions can
    /// share one router.
    pub async fn invoke(&self, name: &str, arguments: Value) -> ToolCall {
        let inv = ToolInvocation {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            arguments: arguments.clone(),
        };
        let result = match self.select(name).oneshot(inv).await {
            Ok(out) => ToolResult::Ok(match out.result {
                Value::String(s) => s,
                other => other.to_string(),
            }),
            Err(e) => ToolResult::Err(RouterError::from_boxed(e).to_string()),
        };
        let call = ToolCall {
            name: name.to_string(),
            arguments,
            result,
        };
        debug!(tool = %call.name, ok = call.is_ok(), "tool call resolved");
        call
    }
}

impl Service<ToolInvocation> for ToolRouter {
    type Response = ToolOutput;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness is checked on the selected service inside `call`.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ToolInvocation) -> Self::Future {
        let svc = self.select(&req.name);
        Box::pin(svc.oneshot(req))
    }
}

// =============================
// Film catalogue tools
// =============================

/// Arguments for [`SEARCH_FILMS_BY_TITLE`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchFilmsArgs {
    /// Part of the film title, at least two characters
    pub title_search: String,
    /// Maximum number of films to return
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Arguments for [`GET_FILM_BY_ID`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetFilmArgs {
    pub film_id: i64,
}

/// Arguments for [`GET_STREAMING_FILMS`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StreamingFilmsArgs {
    /// Number of films to return, 1 to 100
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Catalogue tools backed by a data lookup collaborator.
pub fn film_tools(lookup: Arc<dyn DataLookup>, default_limit: usize) -> Vec<ToolDef> {
    let default_limit = default_limit.clamp(1, MAX_LOOKUP_LIMIT);

    let search_lookup = lookup.clone();
    let search = tool_typed(
        SEARCH_FILMS_BY_TITLE,
        "Search films by (partial) title. Returns title, category, rating and rental terms.",
        move |args: SearchFilmsArgs| {
            let lookup = search_lookup.clone();
            async move {
                let term = args.title_search.trim().to_string();
                if term.chars().count() < 2 {
                    return Err::<_, BoxError>(Box::new(RouterError::InvalidArgument {
                        message: "title_search must be at least 2 characters".into(),
                    }));
                }
                let limit = args
                    .limit
                    .unwrap_or(default_limit)
                    .clamp(1, MAX_LOOKUP_LIMIT);
                let films = lookup.find_by_title(&term, limit).await?;
                Ok(films)
            }
        },
    );

    let get_lookup = lookup.clone();
    let get = tool_typed(
        GET_FILM_BY_ID,
        "Get the full catalogue record of one film by its numeric id.",
        move |args: GetFilmArgs| {
            let lookup = get_lookup.clone();
            async move {
                if args.film_id <= 0 {
                    return Err::<_, BoxError>(Box::new(RouterError::InvalidArgument {
                        message: "film_id must be positive".into(),
                    }));
                }
                // A missing film is `null`, not an error
                Ok(lookup.get_by_id(args.film_id).await?)
            }
        },
    );

    let streaming = tool_typed(
        GET_STREAMING_FILMS,
        "List films available for streaming, ordered by title.",
        move |args: StreamingFilmsArgs| {
            let lookup = lookup.clone();
            async move {
                let limit = args.limit.unwrap_or(STREAMING_DEFAULT_LIMIT);
                if !(1..=MAX_LOOKUP_LIMIT).contains(&limit) {
                    return Err::<_, BoxError>(Box::new(RouterError::InvalidArgument {
                        message: format!("limit must be between 1 and {MAX_LOOKUP_LIMIT}"),
                    }));
                }
                Ok(lookup.streaming(limit).await?)
            }
        },
    );

    vec![search, get, streaming]
}
