//! Executor instruction model
//!
//! The resolver's output: a flat, ordered list of primitive instructions.
//! Instructions are immutable values and never reference each other; all
//! data flow goes through graph/metadata handles. Execution order is the
//! list order.
//!
//! Everything here is serde-serializable so a resolved program can cross a
//! process boundary to an executor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::{Component, Graph, GraphMetadata};
use crate::predicate::Comparator;

/// Traversal direction for lineage queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ancestor,
    Descendant,
    Both,
}

impl Direction {
    /// Surface-language direction strings are matched by prefix: anything
    /// starting with `a` is ancestor, `d` descendant, otherwise both.
    pub fn from_surface(text: &str) -> Self {
        match text.as_bytes().first() {
            Some(b'a') => Direction::Ancestor,
            Some(b'd') => Direction::Descendant,
            _ => Direction::Both,
        }
    }
}

/// Which endpoint vertices of an edge set to select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Source,
    Destination,
    Both,
}

/// Which component(s) a metadata annotation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataComponent {
    Vertex,
    Edge,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    PlainText,
    Dot,
}

/// A single already-normalized field comparison, pushed down to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldComparison {
    pub field: String,
    pub op: Comparator,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    CreateEmptyGraph {
        graph: Graph,
    },
    CreateEmptyGraphMetadata {
        metadata: GraphMetadata,
    },
    /// `target ∪= source`
    UnionGraph {
        target: Graph,
        source: Graph,
    },
    IntersectGraph {
        target: Graph,
        lhs: Graph,
        rhs: Graph,
    },
    /// `target = minuend ∖ subtrahend`, optionally restricted to one
    /// component.
    SubtractGraph {
        target: Graph,
        minuend: Graph,
        subtrahend: Graph,
        component: Option<Component>,
    },
    /// Deduplicate `source` into `target`.
    DistinctifyGraph {
        target: Graph,
        source: Graph,
    },
    InsertLiteralVertex {
        target: Graph,
        vertices: Vec<String>,
    },
    InsertLiteralEdge {
        target: Graph,
        edges: Vec<String>,
    },
    GetVertex {
        target: Graph,
        subject: Graph,
        filter: Option<FieldComparison>,
    },
    GetEdge {
        target: Graph,
        subject: Graph,
        filter: Option<FieldComparison>,
    },
    GetEdgeEndpoint {
        target: Graph,
        subject: Graph,
        endpoint: Endpoint,
    },
    GetLineage {
        target: Graph,
        subject: Graph,
        start: Graph,
        depth: i64,
        direction: Direction,
    },
    GetLink {
        target: Graph,
        subject: Graph,
        source: Graph,
        destination: Graph,
        max_depth: i64,
    },
    GetPath {
        target: Graph,
        subject: Graph,
        source: Graph,
        destination: Graph,
        max_depth: i64,
    },
    GetShortestPath {
        target: Graph,
        subject: Graph,
        source: Graph,
        destination: Graph,
        max_depth: i64,
    },
    /// Induce the subgraph of `subject` spanned by `skeleton`'s vertices.
    GetSubgraph {
        target: Graph,
        subject: Graph,
        skeleton: Graph,
    },
    CollapseEdge {
        target: Graph,
        subject: Graph,
        fields: Vec<String>,
    },
    SetGraphMetadata {
        target: GraphMetadata,
        component: MetadataComponent,
        subject: Graph,
        name: String,
        value: String,
    },
    /// Layer `overlay` over `base` into `target`; overlay wins conflicts.
    OverwriteGraphMetadata {
        target: GraphMetadata,
        base: GraphMetadata,
        overlay: GraphMetadata,
    },
    LimitGraph {
        target: Graph,
        subject: Graph,
        limit: i64,
    },
    /// Raw backend query produced by `asVertex` / `asEdge`, with variable
    /// placeholders already substituted.
    EvaluateQuery {
        query: String,
    },
    ExportGraph {
        subject: Graph,
        format: ExportFormat,
        force: bool,
    },
    StatGraph {
        subject: Graph,
    },
    ListGraphs {
        style: String,
    },
    EraseSymbols {
        symbols: Vec<String>,
    },
}

/// A resolved program: the instruction list plus the symbol-table snapshot
/// it was resolved against. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub symbols: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_prefix_matching() {
        assert_eq!(Direction::from_surface("ancestor"), Direction::Ancestor);
        assert_eq!(Direction::from_surface("a"), Direction::Ancestor);
        assert_eq!(Direction::from_surface("descendants"), Direction::Descendant);
        assert_eq!(Direction::from_surface("both"), Direction::Both);
        assert_eq!(Direction::from_surface(""), Direction::Both);
        assert_eq!(Direction::from_surface("up"), Direction::Both);
    }

    #[test]
    fn instructions_serialize_with_op_tags() {
        let instruction = Instruction::GetVertex {
            target: Graph::new("trace_2"),
            subject: Graph::base(),
            filter: Some(FieldComparison {
                field: "type".into(),
                op: Comparator::Equal,
                value: "Process".into(),
            }),
        };
        let json = serde_json::to_value(&instruction).unwrap();
        assert_eq!(json["op"], "get_vertex");
        assert_eq!(json["subject"], "trace_base");
        assert_eq!(json["filter"]["op"], "equal");

        let back: Instruction = serde_json::from_value(json).unwrap();
        assert_eq!(back, instruction);
    }

    #[test]
    fn program_round_trips_through_json() {
        let program = Program {
            instructions: vec![
                Instruction::CreateEmptyGraph {
                    graph: Graph::new("trace_1"),
                },
                Instruction::ListGraphs {
                    style: "standard".into(),
                },
            ],
            symbols: BTreeMap::from([("$a".to_string(), "trace_1".to_string())]),
        };
        let text = serde_json::to_string(&program).unwrap();
        let back: Program = serde_json::from_str(&text).unwrap();
        assert_eq!(back, program);
    }
}
