//! Minimal state graph: named nodes, static edges, compile, then invoke.

use crate::utils::error::{PipelineError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Terminal pseudo-node.
pub const END: &str = "__end__";

/// Upper bound on node executions per invocation.
pub const DEFAULT_STEP_LIMIT: usize = 25;

/// One step of the graph: takes the state, returns the updated state.
#[async_trait]
pub trait Node<S: Send + 'static>: Send + Sync {
    async fn run(&self, state: S) -> Result<S>;
}

fn graph_error(message: impl Into<String>) -> PipelineError {
    PipelineError::GraphError {
        message: message.into(),
    }
}

pub struct StateGraph<S: Send + 'static> {
    nodes: Vec<(String, Arc<dyn Node<S>>)>,
    edges: Vec<(String, String)>,
    entry_point: Option<String>,
}

impl<S: Send + 'static> Default for StateGraph<S> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            entry_point: None,
        }
    }
}

impl<S: Send + 'static> StateGraph<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: impl Into<String>, node: impl Node<S> + 'static) -> &mut Self {
        self.nodes.push((name.into(), Arc::new(node)));
        self
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    pub fn set_entry_point(&mut self, name: impl Into<String>) -> &mut Self {
        self.entry_point = Some(name.into());
        self
    }

    /// Checks the topology and freezes it.
    pub fn compile(self) -> Result<CompiledGraph<S>> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut nodes = HashMap::new();
        for (name, node) in self.nodes {
            if name == END {
                return Err(graph_error(format!("'{}' is a reserved node name", END)));
            }
            if nodes.insert(name.clone(), node).is_some() {
                return Err(graph_error(format!("Node '{}' is defined more than once", name)));
            }
            order.push(name);
        }

        let entry_point = self
            .entry_point
            .ok_or_else(|| graph_error("Graph has no entry point"))?;
        if !nodes.contains_key(&entry_point) {
            return Err(graph_error(format!(
                "Entry point '{}' is not a node",
                entry_point
            )));
        }

        let mut next = HashMap::new();
        for (from, to) in &self.edges {
            if !nodes.contains_key(from) {
                return Err(graph_error(format!("Edge starts at unknown node '{}'", from)));
            }
            if to != END && !nodes.contains_key(to) {
                return Err(graph_error(format!("Edge points to unknown node '{}'", to)));
            }
            if next.insert(from.clone(), to.clone()).is_some() {
                return Err(graph_error(format!(
                    "Node '{}' has more than one outgoing edge",
                    from
                )));
            }
        }

        if let Some(dangling) = order.iter().find(|name| !next.contains_key(*name)) {
            return Err(graph_error(format!("Node '{}' has no outgoing edge", dangling)));
        }

        Ok(CompiledGraph {
            nodes,
            order,
            next,
            entry_point,
            step_limit: DEFAULT_STEP_LIMIT,
        })
    }
}

/// Node names and edges, as exposed by the studio endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphDescription {
    pub entry_point: String,
    pub nodes: Vec<String>,
    pub edges: Vec<(String, String)>,
}

pub struct CompiledGraph<S: Send + 'static> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    order: Vec<String>,
    next: HashMap<String, String>,
    entry_point: String,
    step_limit: usize,
}

impl<S: Send + 'static> CompiledGraph<S> {
    pub fn with_step_limit(mut self, step_limit: usize) -> Self {
        self.step_limit = step_limit;
        self
    }

    pub async fn invoke(&self, mut state: S) -> Result<S> {
        let mut current = self.entry_point.clone();
        let mut steps = 0;

        while current != END {
            if steps == self.step_limit {
                return Err(graph_error(format!(
                    "Step limit of {} reached without hitting {}",
                    self.step_limit, END
                )));
            }
            steps += 1;

            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| graph_error(format!("Unknown node '{}'", current)))?;
            tracing::trace!("Running node '{}'", current);
            state = node.run(state).await?;

            current = self
                .next
                .get(&current)
                .cloned()
                .ok_or_else(|| graph_error(format!("Node '{}' has no outgoing edge", current)))?;
        }

        Ok(state)
    }

    pub fn describe(&self) -> GraphDescription {
        GraphDescription {
            entry_point: self.entry_point.clone(),
            nodes: self.order.clone(),
            edges: self
                .order
                .iter()
                .filter_map(|n| self.next.get(n).map(|to| (n.clone(), to.clone())))
                .collect(),
        }
    }
}
