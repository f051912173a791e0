//! Configuration for the handoff router
//!
//! Two pieces of static configuration are loaded once at startup:
//! - [`RouterConfig`]: runtime bounds (hops, timeouts) and collaborator defaults
//! - [`GraphConfig`]: the entry and fallback responders and the permitted handoff edges

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, RouterError};

/// Bounds for [`RouterConfig::lookup_limit`]; values outside are clamped.
pub const LOOKUP_LIMIT_RANGE: std::ops::RangeInclusive<usize> = 1..=100;

/// Name of the catalogue-backed responder in the default film desk setup.
pub const SEARCH: &str = "search";

/// Name of the general-knowledge responder in the default film desk setup.
pub const GENERIC: &str = "generic";

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Maximum accepted handoffs per question
    pub max_hops: usize,

    /// Upper bound on a single responder turn
    #[serde(with = "duration_ms")]
    pub hop_timeout: Duration,

    /// Upper bound on a single tool call against a collaborator
    #[serde(with = "duration_ms")]
    pub tool_timeout: Duration,

    /// Retries for transient tool failures
    pub tool_retries: usize,

    /// Optional wall-clock deadline for a whole question
    #[serde(with = "opt_duration_ms")]
    pub request_deadline: Option<Duration>,

    /// Maximum rows a title search returns, clamped to [`LOOKUP_LIMIT_RANGE`] on use
    pub lookup_limit: usize,

    /// Completion model id
    pub model: String,

    /// Sampling temperature for completions
    pub temperature: f32,

    /// Completion token cap
    pub max_tokens: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_hops: 4,
            hop_timeout: Duration::from_secs(30),
            tool_timeout: Duration::from_secs(10),
            tool_retries: 1,
            request_deadline: None,
            lookup_limit: 5,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

impl RouterConfig {
    /// Defaults overlaid with `HANDOFF_*` and `OPENAI_MODEL_ID` environment variables.
    ///
    /// `HANDOFF_LOOKUP_LIMIT` is clamped rather than rejected.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RouterConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = get("HANDOFF_MAX_HOPS") {
            cfg.max_hops = parse_var("HANDOFF_MAX_HOPS", &v)?;
        }
        if let Some(v) = get("HANDOFF_HOP_TIMEOUT_MS") {
            cfg.hop_timeout = Duration::from_millis(parse_var("HANDOFF_HOP_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("HANDOFF_TOOL_TIMEOUT_MS") {
            cfg.tool_timeout = Duration::from_millis(parse_var("HANDOFF_TOOL_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("HANDOFF_TOOL_RETRIES") {
            cfg.tool_retries = parse_var("HANDOFF_TOOL_RETRIES", &v)?;
        }
        if let Some(v) = get("HANDOFF_LOOKUP_LIMIT") {
            cfg = cfg.with_lookup_limit(parse_var("HANDOFF_LOOKUP_LIMIT", &v)?);
        }
        if let Some(v) = get("HANDOFF_REQUEST_DEADLINE_MS") {
            cfg.request_deadline = Some(Duration::from_millis(parse_var(
                "HANDOFF_REQUEST_DEADLINE_MS",
                &v,
            )?));
        }
        if let Some(v) = get("OPENAI_MODEL_ID") {
            if !v.trim().is_empty() {
                cfg.model = v.trim().to_string();
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_hops == 0 {
            return Err(config_err("max_hops must be at least 1"));
        }
        if self.hop_timeout.is_zero() {
            return Err(config_err("hop_timeout must be non-zero"));
        }
        if self.tool_timeout.is_zero() {
            return Err(config_err("tool_timeout must be non-zero"));
        }
        Ok(())
    }

    /// Time a responder may spend on tool calls in one turn. The rest of the hop is
    /// left for it to decide and decline, so a stalled collaborator surfaces as a
    /// responder-level failure instead of a hop timeout.
    pub fn tool_budget(&self) -> Duration {
        self.hop_timeout * 4 / 5
    }

    /// `lookup_limit` clamped to [`LOOKUP_LIMIT_RANGE`].
    pub fn effective_lookup_limit(&self) -> usize {
        self.lookup_limit
            .clamp(*LOOKUP_LIMIT_RANGE.start(), *LOOKUP_LIMIT_RANGE.end())
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn with_hop_timeout(mut self, dur: Duration) -> Self {
        self.hop_timeout = dur;
        self
    }

    pub fn with_tool_timeout(mut self, dur: Duration) -> Self {
        self.tool_timeout = dur;
        self
    }

    pub fn with_tool_retries(mut self, retries: usize) -> Self {
        self.tool_retries = retries;
        self
    }

    pub fn with_lookup_limit(mut self, limit: usize) -> Self {
        self.lookup_limit = limit;
        self.lookup_limit = self.effective_lookup_limit();
        self
    }

    pub fn with_request_deadline(mut self, dur: Duration) -> Self {
        self.request_deadline = Some(dur);
        self
    }
}

/// One permitted handoff, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeConfig {
    pub source: String,
    pub target: String,
    /// Natural-language rule describing when the handoff applies
    #[serde(default)]
    pub condition: String,
}

/// Static routing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    pub entry: String,
    pub fallback: String,
    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
}

impl GraphConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The default film desk: catalogue search first, general knowledge as fallback.
    pub fn film_desk() -> Self {
        Self {
            entry: SEARCH.to_string(),
            fallback: GENERIC.to_string(),
            edges: vec![
                EdgeConfig {
                    source: SEARCH.to_string(),
                    target: GENERIC.to_string(),
                    condition: "The question is not about films, rentals or the catalogue"
                        .to_string(),
                },
                EdgeConfig {
                    source: GENERIC.to_string(),
                    target: SEARCH.to_string(),
                    condition: "The question needs catalogue data such as rental rates"
                        .to_string(),
                },
            ],
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| config_err(&format!("{key} has invalid value {raw:?}")))
}

fn config_err(message: &str) -> RouterError {
    RouterError::Config {
        message: message.to_string(),
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
