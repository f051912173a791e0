//! Handoff graph: which responder may defer to which.
//!
//! Edges are static and carry the natural-language condition that justifies them.
//! The graph only checks reachability; it does not arbitrate between overlapping
//! edges, and cycles are allowed (the runtime's hop budget bounds them).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::GraphConfig;
use crate::error::{Result, RouterError};
use crate::registry::CapabilityRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffEdge {
    pub source: String,
    pub target: String,
    pub condition: String,
}

#[derive(Debug, Clone, Default)]
pub struct HandoffGraph {
    edges: Vec<HandoffEdge>,
    by_source: HashMap<String, Vec<usize>>,
}

#[derive(Debug, Default)]
pub struct HandoffGraphBuilder {
    edges: Vec<HandoffEdge>,
}

impl HandoffGraphBuilder {
    pub fn edge(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        self.edges.push(HandoffEdge {
            source: source.into(),
            target: target.into(),
            condition: condition.into(),
        });
        self
    }

    /// Validate every endpoint against `registry`. Repeated edges keep the first condition.
    pub fn build(self, registry: &CapabilityRegistry) -> Result<HandoffGraph> {
        let mut graph = HandoffGraph::default();
        for edge in self.edges {
            for name in [&edge.source, &edge.target] {
                if !registry.contains(name) {
                    return Err(RouterError::UnknownResponder { name: name.clone() });
                }
            }
            if graph.is_permitted(&edge.source, &edge.target) {
                continue;
            }
            graph
                .by_source
                .entry(edge.source.clone())
                .or_default()
                .push(graph.edges.len());
            graph.edges.push(edge);
        }
        Ok(graph)
    }
}

impl HandoffGraph {
    pub fn builder() -> HandoffGraphBuilder {
        HandoffGraphBuilder::default()
    }

    pub fn from_config(config: &GraphConfig, registry: &CapabilityRegistry) -> Result<Self> {
        config
            .edges
            .iter()
            .fold(Self::builder(), |b, e| {
                b.edge(&e.source, &e.target, &e.condition)
            })
            .build(registry)
    }

    pub fn is_permitted(&self, source: &str, target: &str) -> bool {
        self.edges_from(source).any(|e| e.target == target)
    }

    /// Like [`HandoffGraph::is_permitted`], as an error for the runtime to record.
    pub fn check(&self, source: &str, target: &str) -> Result<()> {
        if self.is_permitted(source, target) {
            Ok(())
        } else {
            Err(RouterError::InvalidHandoff {
                source_name: source.to_string(),
                target: target.to_string(),
            })
        }
    }

    pub fn edges_from<'a>(&'a self, source: &str) -> impl Iterator<Item = &'a HandoffEdge> + 'a {
        self.by_source
            .get(source)
            .into_iter()
            .flatten()
            .map(move |&i| &self.edges[i])
    }

    pub fn condition(&self, source: &str, target: &str) -> Option<&str> {
        self.edges_from(source)
            .find(|e| e.target == target)
            .map(|e| e.condition.as_str())
    }

    pub fn edges(&self) -> &[HandoffEdge] {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
