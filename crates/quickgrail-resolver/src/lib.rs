//! QuickGrail query resolver
//!
//! Lowers a parsed QuickGrail program into a flat, ordered list of primitive
//! instructions an executor can run one by one. The resolver owns:
//! - the persistent symbol [`environment`] (variable bindings, the durable
//!   graph-handle allocator, and backing-table garbage collection)
//! - the [`predicate`] filter model and its postfix persistence codec
//! - the [`instruction`] value model emitted to executors
//!
//! Entry point: [`resolve_program`]. Resolution is all-or-nothing: any
//! failure aborts the call and no partial program is returned, though
//! environment writes made by already-resolved statements remain.

pub mod entity;
pub mod environment;
pub mod instruction;
pub mod predicate;
mod resolver;

pub use entity::{Component, Entity, Graph, GraphMetadata};
pub use environment::Environment;
pub use instruction::{
    Direction, Endpoint, ExportFormat, FieldComparison, Instruction, MetadataComponent, Program,
};
pub use predicate::{Comparator, PredicateNode};
pub use resolver::resolve_program;
