//! Graph and metadata handles
//!
//! A handle is a short name minted by the environment's allocator. The
//! resolver only ever manipulates handles; the executor maps each handle to
//! backing tables (`<name>_vertex` / `<name>_edge` for graphs, `<name>` for
//! metadata).

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Handle name of the reserved base graph (the full trace).
pub const BASE_GRAPH_NAME: &str = "trace_base";

/// Surface symbol bound to the base graph. Read-only.
pub const BASE_GRAPH_SYMBOL: &str = "$base";

// ============================================================================
// Graph
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Graph {
    name: String,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn base() -> Self {
        Self::new(BASE_GRAPH_NAME)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_base(&self) -> bool {
        self.name == BASE_GRAPH_NAME
    }

    pub fn vertex_table(&self) -> String {
        format!("{}_vertex", self.name)
    }

    pub fn edge_table(&self) -> String {
        format!("{}_edge", self.name)
    }

    pub fn table(&self, component: Component) -> String {
        match component {
            Component::Vertex => self.vertex_table(),
            Component::Edge => self.edge_table(),
        }
    }
}

// ============================================================================
// GraphMetadata
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphMetadata {
    name: String,
}

impl GraphMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> String {
        self.name.clone()
    }
}

// ============================================================================
// Entity
// ============================================================================

/// Which half of a graph an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Vertex,
    Edge,
}

/// Result of resolving an expression: either a graph or a metadata handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Graph(Graph),
    Metadata(GraphMetadata),
}

impl Entity {
    pub fn into_graph(self, context: &str) -> Result<Graph> {
        match self {
            Entity::Graph(graph) => Ok(graph),
            Entity::Metadata(_) => bail!("Expected a Graph value {context}"),
        }
    }

    pub fn into_metadata(self, context: &str) -> Result<GraphMetadata> {
        match self {
            Entity::Metadata(metadata) => Ok(metadata),
            Entity::Graph(_) => bail!("Expected a GraphMetadata value {context}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_handles_name_their_tables() {
        let graph = Graph::new("trace_12");
        assert_eq!(graph.vertex_table(), "trace_12_vertex");
        assert_eq!(graph.edge_table(), "trace_12_edge");
        assert_eq!(graph.table(Component::Vertex), "trace_12_vertex");
        assert!(!graph.is_base());
        assert!(Graph::base().is_base());
    }

    #[test]
    fn entity_coercion_reports_mismatches() {
        let entity = Entity::Metadata(GraphMetadata::new("meta_3"));
        let err = entity.into_graph("as dump target").unwrap_err();
        assert!(err.to_string().contains("Expected a Graph value"));
    }
}
