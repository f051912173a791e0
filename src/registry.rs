//! Capability registry: the authoritative set of responders
//!
//! Each registration pairs a name with a responder and the tool functions it is
//! allowed to call. The registry also designates the entry responder (first to see
//! every question) and the fallback responder (asked for a best-effort answer when
//! routing fails). It is built once at startup and only read afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::GraphConfig;
use crate::error::{Result, RouterError};
use crate::responder::{Responder, ResponderInfo};

pub type SharedResponder = Arc<dyn Responder>;

#[derive(Clone)]
struct Registration {
    responder: SharedResponder,
    tools: Vec<String>,
}

#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    entries: HashMap<String, Registration>,
    // registration order, for stable listings
    order: Vec<String>,
    entry: Option<String>,
    fallback: Option<String>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `responder` under `name`, declaring the tools it may invoke.
    ///
    /// Fails if the name is taken or the responder exposes a tool not in `tool_names`.
    pub fn register<I, S>(
        &mut self,
        name: impl Into<String>,
        tool_names: I,
        responder: SharedResponder,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(RouterError::DuplicateResponder { name });
        }
        let tools: Vec<String> = tool_names.into_iter().map(Into::into).collect();
        if let Some(tool) = responder.tools().into_iter().find(|t| !tools.contains(t)) {
            return Err(RouterError::UndeclaredTool {
                responder: name,
                tool,
            });
        }
        debug!(responder = %name, tools = ?tools, "registered responder");
        self.order.push(name.clone());
        self.entries.insert(name, Registration { responder, tools });
        Ok(())
    }

    /// Register a responder under its own name with its own tool list.
    pub fn register_responder(&mut self, responder: SharedResponder) -> Result<()> {
        let name = responder.name().to_string();
        let tools = responder.tools();
        self.register(name, tools, responder)
    }

    pub fn set_entry_point(&mut self, name: &str) -> Result<()> {
        self.require(name)?;
        self.entry = Some(name.to_string());
        Ok(())
    }

    pub fn set_fallback(&mut self, name: &str) -> Result<()> {
        self.require(name)?;
        self.fallback = Some(name.to_string());
        Ok(())
    }

    /// Take entry and fallback from static routing configuration.
    pub fn configure(&mut self, config: &GraphConfig) -> Result<()> {
        self.set_entry_point(&config.entry)?;
        self.set_fallback(&config.fallback)
    }

    pub fn entry_point(&self) -> Result<&str> {
        self.entry.as_deref().ok_or(RouterError::NoEntryPoint)
    }

    pub fn fallback(&self) -> Result<&str> {
        self.fallback.as_deref().ok_or(RouterError::NoFallback)
    }

    pub fn resolve(&self, name: &str) -> Result<SharedResponder> {
        self.entries
            .get(name)
            .map(|r| r.responder.clone())
            .ok_or_else(|| RouterError::UnknownResponder {
                name: name.to_string(),
            })
    }

    pub fn declared_tools(&self, name: &str) -> Result<&[String]> {
        self.entries
            .get(name)
            .map(|r| r.tools.as_slice())
            .ok_or_else(|| RouterError::UnknownResponder {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Descriptions of every responder in registration order.
    pub fn describe(&self) -> Vec<ResponderInfo> {
        self.order
            .iter()
            .filter_map(|n| self.entries.get(n))
            .map(|r| r.responder.describe())
            .collect()
    }

    fn require(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(RouterError::UnknownResponder {
                name: name.to_string(),
            })
        }
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("responders", &self.order)
            .field("entry", &self.entry)
            .field("fallback", &self.fallback)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responder::{ResponderInput, ResponderOutput, ResponderResult};
    use async_trait::async_trait;

    struct Stub {
        name: &'static str,
        tools: Vec<String>,
    }

    #[async_trait]
    impl Responder for Stub {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "stub"
        }
        fn tools(&self) -> Vec<String> {
            self.tools.clone()
        }
        async fn respond(&self, _input: ResponderInput<'_>) -> ResponderOutput {
            ResponderOutput::new(ResponderResult::answer(self.name))
        }
    }

    fn stub(name: &'static str, tools: &[&str]) -> SharedResponder {
        Arc::new(Stub {
            name,
            tools: tools.iter().map(|t| t.to_string()).collect(),
        })
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register("search", ["lookup"], stub("search", &["lookup"]))
            .unwrap();
        let err = registry
            .register("search", Vec::<String>::new(), stub("search", &[]))
            .unwrap_err();
        assert!(matches!(err, RouterError::DuplicateResponder { ref name } if name == "search"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn undeclared_tools_are_rejected() {
        let mut registry = CapabilityRegistry::new();
        let err = registry
            .register("search", ["lookup"], stub("search", &["lookup", "drop_table"]))
            .unwrap_err();
        assert!(
            matches!(err, RouterError::UndeclaredTool { ref tool, .. } if tool == "drop_table")
        );
        assert!(!registry.contains("search"));
    }

    #[test]
    fn entry_and_fallback_must_be_registered() {
        let mut registry = CapabilityRegistry::new();
        assert!(matches!(
            registry.entry_point(),
            Err(RouterError::NoEntryPoint)
        ));
        assert!(matches!(registry.fallback(), Err(RouterError::NoFallback)));
        assert!(matches!(
            registry.set_entry_point("ghost"),
            Err(RouterError::UnknownResponder { .. })
        ));

        registry.register_responder(stub("a", &[])).unwrap();
        registry.register_responder(stub("b", &["t"])).unwrap();
        registry.configure(&GraphConfig {
            entry: "a".into(),
            fallback: "b".into(),
            edges: vec![],
        })
        .unwrap();
        assert_eq!(registry.entry_point().unwrap(), "a");
        assert_eq!(registry.fallback().unwrap(), "b");
        assert_eq!(registry.declared_tools("b").unwrap(), ["t".to_string()]);
    }

    #[test]
    fn resolve_and_describe() {
        let mut registry = CapabilityRegistry::new();
        registry.register_responder(stub("first", &[])).unwrap();
        registry.register_responder(stub("second", &[])).unwrap();
        assert_eq!(registry.resolve("second").unwrap().name(), "second");
        assert!(matches!(
            registry.resolve("third"),
            Err(RouterError::UnknownResponder { .. })
        ));
        let names: Vec<String> = registry.describe().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}
