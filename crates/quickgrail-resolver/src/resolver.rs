//! Statement resolution
//!
//! Walks a parsed program statement by statement and appends primitive
//! instructions to a call-scoped session. Sessions are cheap and
//! single-use; nothing here outlives one `resolve_program` call except the
//! environment passed in.
//!
//! Conventions, enforced throughout:
//! - every graph assignment lands in a freshly distinctified handle before
//!   the variable is rebound, so a bound graph variable always names a
//!   duplicate-free row set
//! - expression results flow through explicit output targets; a method
//!   either writes into the accumulator it was handed or into a fresh
//!   handle it allocates

use anyhow::{anyhow, bail, Context, Result};
use quickgrail_ast as ast;
use quickgrail_storage::SymbolStore;
use regex::Regex;
use tracing::debug;

use crate::entity::{Component, Entity, Graph, GraphMetadata};
use crate::environment::Environment;
use crate::instruction::{
    Direction, Endpoint, ExportFormat, FieldComparison, Instruction, MetadataComponent, Program,
};
use crate::predicate::{self, PredicateNode};

/// Resolve a parsed program against `env`, producing an executor-ready
/// instruction list. All-or-nothing: any failure aborts the whole call.
pub fn resolve_program<S: SymbolStore>(
    program: &ast::Program,
    env: &mut Environment<S>,
) -> Result<Program> {
    debug!(statements = program.statements.len(), "resolving program");
    let mut session = Session {
        env: &mut *env,
        instructions: Vec::new(),
    };
    for statement in &program.statements {
        session.resolve_statement(statement)?;
    }
    let instructions = session.instructions;
    Ok(Program {
        instructions,
        symbols: env.snapshot(),
    })
}

// ============================================================================
// Output targets
// ============================================================================

/// Where an expression's result should land.
enum Target {
    /// Caller has no preference; the callee allocates a fresh handle.
    Fresh,
    /// Accumulate into an existing graph handle.
    Graph(Graph),
    /// Merge over an existing metadata handle.
    Metadata(GraphMetadata),
}

enum GraphTarget {
    Fresh,
    Into(Graph),
}

enum MetadataTarget {
    Fresh,
    Into(GraphMetadata),
}

impl Target {
    fn into_graph_target(self, location: &str) -> Result<GraphTarget> {
        match self {
            Target::Fresh => Ok(GraphTarget::Fresh),
            Target::Graph(graph) => Ok(GraphTarget::Into(graph)),
            Target::Metadata(_) => {
                bail!("Cannot produce a Graph value for a GraphMetadata target at {location}")
            }
        }
    }

    fn into_metadata_target(self, location: &str) -> Result<MetadataTarget> {
        match self {
            Target::Fresh => Ok(MetadataTarget::Fresh),
            Target::Metadata(metadata) => Ok(MetadataTarget::Into(metadata)),
            Target::Graph(_) => {
                bail!("Cannot produce a GraphMetadata value for a Graph target at {location}")
            }
        }
    }
}

// ============================================================================
// Session
// ============================================================================

struct Session<'a, S: SymbolStore> {
    env: &'a mut Environment<S>,
    instructions: Vec<Instruction>,
}

impl<S: SymbolStore> Session<'_, S> {
    fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Fresh graph handle plus the instruction that materializes it.
    fn allocate_empty_graph(&mut self) -> Result<Graph> {
        let graph = self.env.allocate_graph()?;
        self.push(Instruction::CreateEmptyGraph {
            graph: graph.clone(),
        });
        Ok(graph)
    }

    fn allocate_empty_metadata(&mut self) -> Result<GraphMetadata> {
        let metadata = self.env.allocate_graph_metadata()?;
        self.push(Instruction::CreateEmptyGraphMetadata {
            metadata: metadata.clone(),
        });
        Ok(metadata)
    }

    fn materialize_graph(&mut self, target: GraphTarget) -> Result<Graph> {
        match target {
            GraphTarget::Fresh => self.allocate_empty_graph(),
            GraphTarget::Into(graph) => Ok(graph),
        }
    }

    // ------------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------------

    fn resolve_statement(&mut self, statement: &ast::Statement) -> Result<()> {
        match statement {
            ast::Statement::Assignment { lhs, op, rhs } => self.resolve_assignment(lhs, *op, rhs),
            ast::Statement::Command { name, arguments } => self.resolve_command(name, arguments),
        }
    }

    fn resolve_assignment(
        &mut self,
        lhs: &ast::Variable,
        op: ast::AssignOp,
        rhs: &ast::Expression,
    ) -> Result<()> {
        match lhs.kind {
            ast::VariableKind::Graph => self.resolve_graph_assignment(lhs, op, rhs),
            ast::VariableKind::Metadata => self.resolve_metadata_assignment(lhs, op, rhs),
            ast::VariableKind::Predicate => self.resolve_predicate_assignment(lhs, op, rhs),
        }
    }

    fn resolve_graph_assignment(
        &mut self,
        lhs: &ast::Variable,
        op: ast::AssignOp,
        rhs: &ast::Expression,
    ) -> Result<()> {
        let result = match op {
            ast::AssignOp::Assign => {
                self.resolve_graph_expression(rhs, GraphTarget::Fresh, true)?
            }
            ast::AssignOp::UnionAssign => {
                let bound = self.lookup_graph(lhs)?;
                // accumulate in place, except into the immutable base graph
                let accumulator = if bound.is_base() {
                    let fresh = self.allocate_empty_graph()?;
                    self.push(Instruction::UnionGraph {
                        target: fresh.clone(),
                        source: bound,
                    });
                    fresh
                } else {
                    bound
                };
                self.resolve_graph_expression(rhs, GraphTarget::Into(accumulator.clone()), true)?;
                accumulator
            }
            ast::AssignOp::SubtractAssign | ast::AssignOp::IntersectAssign => {
                let bound = self.lookup_graph(lhs)?;
                let rhs_graph = self.resolve_graph_expression(rhs, GraphTarget::Fresh, true)?;
                let output = self.allocate_empty_graph()?;
                match op {
                    ast::AssignOp::SubtractAssign => self.push(Instruction::SubtractGraph {
                        target: output.clone(),
                        minuend: bound,
                        subtrahend: rhs_graph,
                        component: None,
                    }),
                    _ => self.push(Instruction::IntersectGraph {
                        target: output.clone(),
                        lhs: bound,
                        rhs: rhs_graph,
                    }),
                }
                output
            }
        };
        // rebind through a deduplicated copy
        let distinct = self.allocate_empty_graph()?;
        self.push(Instruction::DistinctifyGraph {
            target: distinct.clone(),
            source: result,
        });
        self.env.set_value(&lhs.name.value, distinct.name())?;
        Ok(())
    }

    fn resolve_metadata_assignment(
        &mut self,
        lhs: &ast::Variable,
        op: ast::AssignOp,
        rhs: &ast::Expression,
    ) -> Result<()> {
        let result = match op {
            ast::AssignOp::Assign => self.resolve_expression(rhs, Target::Fresh, true)?,
            ast::AssignOp::UnionAssign => {
                let bound = self.env.metadata_symbol(&lhs.name.value).ok_or_else(|| {
                    anyhow!(
                        "Cannot resolve GraphMetadata variable {} at {}",
                        lhs.name.value,
                        lhs.name.location
                    )
                })?;
                self.resolve_expression(rhs, Target::Metadata(bound), true)?
            }
            _ => bail!(
                "Unsupported assignment operator for GraphMetadata variable {} at {}",
                lhs.name.value,
                lhs.name.location
            ),
        };
        let metadata = result.into_metadata(&at(rhs.location()))?;
        self.env.set_value(&lhs.name.value, metadata.name())?;
        Ok(())
    }

    fn resolve_predicate_assignment(
        &mut self,
        lhs: &ast::Variable,
        op: ast::AssignOp,
        rhs: &ast::Expression,
    ) -> Result<()> {
        if op != ast::AssignOp::Assign {
            bail!(
                "Unsupported assignment operator for Predicate variable {} at {}",
                lhs.name.value,
                lhs.name.location
            );
        }
        let node = predicate::resolve_predicate(rhs, self.env)?;
        self.env.set_predicate_symbol(&lhs.name.value, &node)
    }

    fn lookup_graph(&self, var: &ast::Variable) -> Result<Graph> {
        self.env.graph_symbol(&var.name.value).ok_or_else(|| {
            anyhow!(
                "Cannot resolve Graph variable {} at {}",
                var.name.value,
                var.name.location
            )
        })
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    fn resolve_command(&mut self, name: &ast::Token, arguments: &[ast::Expression]) -> Result<()> {
        match name.value.to_lowercase().as_str() {
            "dump" => self.resolve_export_command(name, ExportFormat::PlainText, arguments),
            "visualize" => self.resolve_export_command(name, ExportFormat::Dot, arguments),
            "stat" => self.resolve_stat_command(name, arguments),
            "list" => self.resolve_list_command(name, arguments),
            "reset" => self.resolve_reset_command(name, arguments),
            "erase" => self.resolve_erase_command(name, arguments),
            _ => bail!(
                "Unsupported command \"{}\" at {}",
                name.value,
                name.location
            ),
        }
    }

    fn resolve_export_command(
        &mut self,
        name: &ast::Token,
        format: ExportFormat,
        arguments: &[ast::Expression],
    ) -> Result<()> {
        let mut args = arguments.iter();
        let mut force = false;
        let mut graph_arg = args.next();
        if let Some(ast::Expression::Name(token)) = graph_arg {
            if token.value.eq_ignore_ascii_case("force") {
                force = true;
                graph_arg = args.next();
            } else {
                bail!(
                    "Unexpected argument \"{}\" for {} at {}",
                    token.value,
                    name.value,
                    token.location
                );
            }
        }
        let Some(expr) = graph_arg else {
            bail!(
                "Command \"{}\" expects a graph argument at {}",
                name.value,
                name.location
            );
        };
        if args.next().is_some() {
            bail!(
                "Too many arguments for \"{}\" at {}",
                name.value,
                name.location
            );
        }
        let subject = self.resolve_graph_expression(expr, GraphTarget::Fresh, true)?;
        self.push(Instruction::ExportGraph {
            subject,
            format,
            force,
        });
        Ok(())
    }

    fn resolve_stat_command(
        &mut self,
        name: &ast::Token,
        arguments: &[ast::Expression],
    ) -> Result<()> {
        let [expr] = arguments else {
            bail!(
                "Command \"{}\" expects exactly 1 graph argument, found {} at {}",
                name.value,
                arguments.len(),
                name.location
            );
        };
        let graph = self.resolve_graph_expression(expr, GraphTarget::Fresh, true)?;
        // stats are reported over distinct rows
        let distinct = self.allocate_empty_graph()?;
        self.push(Instruction::DistinctifyGraph {
            target: distinct.clone(),
            source: graph,
        });
        self.push(Instruction::StatGraph { subject: distinct });
        Ok(())
    }

    fn resolve_list_command(
        &mut self,
        name: &ast::Token,
        arguments: &[ast::Expression],
    ) -> Result<()> {
        let style = match arguments {
            [] => "standard".to_string(),
            [ast::Expression::Name(token)] => token.value.clone(),
            [other] => bail!(
                "Expected a style name for \"{}\" at {}",
                name.value,
                other.location()
            ),
            _ => bail!(
                "Too many arguments for \"{}\" at {}",
                name.value,
                name.location
            ),
        };
        self.push(Instruction::ListGraphs { style });
        Ok(())
    }

    fn resolve_reset_command(
        &mut self,
        name: &ast::Token,
        arguments: &[ast::Expression],
    ) -> Result<()> {
        let [ast::Expression::Name(token)] = arguments else {
            bail!(
                "Command \"{}\" expects exactly one target name at {}",
                name.value,
                name.location
            );
        };
        if token.value != "workspace" {
            bail!(
                "Unsupported reset target \"{}\" at {}",
                token.value,
                token.location
            );
        }
        self.env.clear()
    }

    fn resolve_erase_command(
        &mut self,
        name: &ast::Token,
        arguments: &[ast::Expression],
    ) -> Result<()> {
        if arguments.is_empty() {
            bail!(
                "Command \"{}\" expects at least one variable at {}",
                name.value,
                name.location
            );
        }
        let mut symbols = Vec::with_capacity(arguments.len());
        for argument in arguments {
            let ast::Expression::Variable(var) = argument else {
                bail!(
                    "Expected a variable argument for \"{}\" at {}",
                    name.value,
                    argument.location()
                );
            };
            symbols.push(var.name.value.clone());
        }
        // unbound symbols are not pre-checked; erasing them is a no-op
        self.push(Instruction::EraseSymbols { symbols });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------

    fn resolve_graph_expression(
        &mut self,
        expr: &ast::Expression,
        target: GraphTarget,
        as_const: bool,
    ) -> Result<Graph> {
        let target = match target {
            GraphTarget::Fresh => Target::Fresh,
            GraphTarget::Into(graph) => Target::Graph(graph),
        };
        self.resolve_expression(expr, target, as_const)?
            .into_graph(&at(expr.location()))
    }

    fn resolve_expression(
        &mut self,
        expr: &ast::Expression,
        target: Target,
        as_const: bool,
    ) -> Result<Entity> {
        match expr {
            ast::Expression::Operation(op) => self.resolve_operation(op, target),
            ast::Expression::Variable(var) => self.resolve_variable(var, target, as_const),
            other => bail!("Unsupported expression at {}", other.location()),
        }
    }

    fn resolve_variable(
        &mut self,
        var: &ast::Variable,
        target: Target,
        as_const: bool,
    ) -> Result<Entity> {
        match var.kind {
            ast::VariableKind::Graph => {
                let target = target.into_graph_target(&var.name.location)?;
                self.resolve_graph_variable(var, target, as_const)
                    .map(Entity::Graph)
            }
            ast::VariableKind::Metadata => {
                let target = target.into_metadata_target(&var.name.location)?;
                self.resolve_metadata_variable(var, target).map(Entity::Metadata)
            }
            ast::VariableKind::Predicate => bail!(
                "Cannot use Predicate variable {} as a value at {}",
                var.name.value,
                var.name.location
            ),
        }
    }

    fn resolve_graph_variable(
        &mut self,
        var: &ast::Variable,
        target: GraphTarget,
        as_const: bool,
    ) -> Result<Graph> {
        let bound = self.lookup_graph(var)?;
        match target {
            // a const reference never copies
            GraphTarget::Fresh if as_const => Ok(bound),
            GraphTarget::Fresh => {
                let output = self.allocate_empty_graph()?;
                self.push(Instruction::UnionGraph {
                    target: output.clone(),
                    source: bound,
                });
                Ok(output)
            }
            GraphTarget::Into(output) => {
                self.push(Instruction::UnionGraph {
                    target: output.clone(),
                    source: bound,
                });
                Ok(output)
            }
        }
    }

    fn resolve_metadata_variable(
        &mut self,
        var: &ast::Variable,
        target: MetadataTarget,
    ) -> Result<GraphMetadata> {
        let bound = self.env.metadata_symbol(&var.name.value).ok_or_else(|| {
            anyhow!(
                "Cannot resolve GraphMetadata variable {} at {}",
                var.name.value,
                var.name.location
            )
        })?;
        match target {
            MetadataTarget::Fresh => Ok(bound),
            MetadataTarget::Into(base) => {
                let output = self.allocate_empty_metadata()?;
                self.push(Instruction::OverwriteGraphMetadata {
                    target: output.clone(),
                    base,
                    overlay: bound,
                });
                Ok(output)
            }
        }
    }

    fn resolve_operation(&mut self, op: &ast::Operation, target: Target) -> Result<Entity> {
        if let Some(subject) = &op.subject {
            let subject = self.resolve_expression(subject, Target::Fresh, true)?;
            return match subject {
                Entity::Graph(graph) => self.resolve_graph_method(graph, op, target),
                Entity::Metadata(_) => bail!(
                    "No GraphMetadata method \"{}\" at {}",
                    op.operator.value,
                    op.operator.location
                ),
            };
        }
        match op.operator.value.as_str() {
            "+" => {
                let (lhs, rhs) = binary_operands(op)?;
                let accumulator = self.resolve_expression(lhs, target, false)?;
                let next = match &accumulator {
                    Entity::Graph(graph) => Target::Graph(graph.clone()),
                    Entity::Metadata(metadata) => Target::Metadata(metadata.clone()),
                };
                self.resolve_expression(rhs, next, true)
            }
            "&" | "-" => {
                let (lhs, rhs) = binary_operands(op)?;
                let lhs = self.resolve_graph_expression(lhs, GraphTarget::Fresh, true)?;
                let rhs = self.resolve_graph_expression(rhs, GraphTarget::Fresh, true)?;
                let target = target.into_graph_target(&op.operator.location)?;
                let output = self.materialize_graph(target)?;
                if op.operator.value == "&" {
                    self.push(Instruction::IntersectGraph {
                        target: output.clone(),
                        lhs,
                        rhs,
                    });
                } else {
                    self.push(Instruction::SubtractGraph {
                        target: output.clone(),
                        minuend: lhs,
                        subtrahend: rhs,
                        component: None,
                    });
                }
                Ok(Entity::Graph(output))
            }
            "vertices" => self.insert_literal(Component::Vertex, op, target),
            "edges" => self.insert_literal(Component::Edge, op, target),
            "asVertex" => self.as_vertex_or_edge(Component::Vertex, op, target),
            "asEdge" => self.as_vertex_or_edge(Component::Edge, op, target),
            other => bail!("Unsupported operation \"{other}\" at {}", op.operator.location),
        }
    }

    // ------------------------------------------------------------------------
    // Graph methods
    // ------------------------------------------------------------------------

    fn resolve_graph_method(
        &mut self,
        subject: Graph,
        op: &ast::Operation,
        target: Target,
    ) -> Result<Entity> {
        let method = &op.operator;
        let args = &op.operands;
        match method.value.as_str() {
            "getVertex" => {
                let target = target.into_graph_target(&method.location)?;
                self.get_vertex_or_edge(Component::Vertex, &subject, op, target)
                    .map(Entity::Graph)
            }
            "getEdge" => {
                let target = target.into_graph_target(&method.location)?;
                self.get_vertex_or_edge(Component::Edge, &subject, op, target)
                    .map(Entity::Graph)
            }
            "getEdgeWithEndpoints" => {
                let target = target.into_graph_target(&method.location)?;
                let edges =
                    self.get_vertex_or_edge(Component::Edge, &subject, op, GraphTarget::Fresh)?;
                let output = self.materialize_graph(target)?;
                self.push(Instruction::UnionGraph {
                    target: output.clone(),
                    source: edges.clone(),
                });
                self.push(Instruction::GetEdgeEndpoint {
                    target: output.clone(),
                    subject: edges,
                    endpoint: Endpoint::Both,
                });
                Ok(Entity::Graph(output))
            }
            "getEdgeSource" => self.get_edge_endpoint(subject, op, target, Endpoint::Source),
            "getEdgeDestination" => {
                self.get_edge_endpoint(subject, op, target, Endpoint::Destination)
            }
            "getEdgeEndpoints" => self.get_edge_endpoint(subject, op, target, Endpoint::Both),
            "getLineage" => {
                expect_operands(op, 3)?;
                let start = self.resolve_graph_expression(&args[0], GraphTarget::Fresh, true)?;
                let depth = integer_literal(&args[1])?;
                let direction = Direction::from_surface(&string_literal(&args[2])?);
                let target = target.into_graph_target(&method.location)?;
                let output = self.materialize_graph(target)?;
                self.push(Instruction::GetLineage {
                    target: output.clone(),
                    subject,
                    start,
                    depth,
                    direction,
                });
                Ok(Entity::Graph(output))
            }
            "getLink" | "getPath" | "getShortestPath" => {
                expect_operands(op, 3)?;
                let source = self.resolve_graph_expression(&args[0], GraphTarget::Fresh, true)?;
                let destination =
                    self.resolve_graph_expression(&args[1], GraphTarget::Fresh, true)?;
                let max_depth = integer_literal(&args[2])?;
                let target = target.into_graph_target(&method.location)?;
                let output = self.materialize_graph(target)?;
                let instruction = match method.value.as_str() {
                    "getLink" => Instruction::GetLink {
                        target: output.clone(),
                        subject,
                        source,
                        destination,
                        max_depth,
                    },
                    "getPath" => Instruction::GetPath {
                        target: output.clone(),
                        subject,
                        source,
                        destination,
                        max_depth,
                    },
                    _ => Instruction::GetShortestPath {
                        target: output.clone(),
                        subject,
                        source,
                        destination,
                        max_depth,
                    },
                };
                self.push(instruction);
                Ok(Entity::Graph(output))
            }
            "getSubgraph" => {
                expect_operands(op, 1)?;
                let skeleton = self.resolve_graph_expression(&args[0], GraphTarget::Fresh, true)?;
                let target = target.into_graph_target(&method.location)?;
                let output = self.materialize_graph(target)?;
                self.push(Instruction::GetSubgraph {
                    target: output.clone(),
                    subject,
                    skeleton,
                });
                Ok(Entity::Graph(output))
            }
            "span" => {
                // `$skeleton.span($source)`: induce over the method subject
                expect_operands(op, 1)?;
                let source = self.resolve_graph_expression(&args[0], GraphTarget::Fresh, true)?;
                let target = target.into_graph_target(&method.location)?;
                let output = self.materialize_graph(target)?;
                self.push(Instruction::GetSubgraph {
                    target: output.clone(),
                    subject: source,
                    skeleton: subject,
                });
                Ok(Entity::Graph(output))
            }
            "collapseEdge" => {
                if args.is_empty() {
                    bail!(
                        "collapseEdge expects at least one field name at {}",
                        method.location
                    );
                }
                let fields = args
                    .iter()
                    .map(string_literal)
                    .collect::<Result<Vec<_>>>()?;
                let target = target.into_graph_target(&method.location)?;
                let output = self.materialize_graph(target)?;
                self.push(Instruction::CollapseEdge {
                    target: output.clone(),
                    subject,
                    fields,
                });
                Ok(Entity::Graph(output))
            }
            "limit" => {
                expect_operands(op, 1)?;
                let limit = integer_literal(&args[0])?;
                let target = target.into_graph_target(&method.location)?;
                let output = self.materialize_graph(target)?;
                self.push(Instruction::LimitGraph {
                    target: output.clone(),
                    subject,
                    limit,
                });
                Ok(Entity::Graph(output))
            }
            "attr" => self.set_metadata(MetadataComponent::Both, subject, op, target),
            "attrVertex" => self.set_metadata(MetadataComponent::Vertex, subject, op, target),
            "attrEdge" => self.set_metadata(MetadataComponent::Edge, subject, op, target),
            other => bail!("Unsupported Graph method \"{other}\" at {}", method.location),
        }
    }

    fn get_edge_endpoint(
        &mut self,
        subject: Graph,
        op: &ast::Operation,
        target: Target,
        endpoint: Endpoint,
    ) -> Result<Entity> {
        expect_operands(op, 0)?;
        let target = target.into_graph_target(&op.operator.location)?;
        let output = self.materialize_graph(target)?;
        self.push(Instruction::GetEdgeEndpoint {
            target: output.clone(),
            subject,
            endpoint,
        });
        Ok(Entity::Graph(output))
    }

    fn get_vertex_or_edge(
        &mut self,
        component: Component,
        subject: &Graph,
        op: &ast::Operation,
        target: GraphTarget,
    ) -> Result<Graph> {
        match op.operands.as_slice() {
            [] => {
                let output = self.materialize_graph(target)?;
                self.push_get(component, output.clone(), subject.clone(), None);
                Ok(output)
            }
            [expr] => {
                let node = predicate::resolve_predicate(expr, self.env)?;
                self.apply_predicate(component, subject, &node, target)
            }
            more => bail!(
                "{} takes at most 1 predicate, found {} at {}",
                op.operator.value,
                more.len(),
                op.operator.location
            ),
        }
    }

    /// Lower a predicate tree over `subject`:
    /// - a comparison becomes one filtered get
    /// - `and` chains filters (the right branch filters the left's result)
    /// - `or` resolves each branch independently and unions both
    /// - `not` subtracts the matching rows from `subject`
    fn apply_predicate(
        &mut self,
        component: Component,
        subject: &Graph,
        node: &PredicateNode,
        target: GraphTarget,
    ) -> Result<Graph> {
        match node {
            PredicateNode::Compare { field, op, value } => {
                let output = self.materialize_graph(target)?;
                self.push_get(
                    component,
                    output.clone(),
                    subject.clone(),
                    Some(FieldComparison {
                        field: field.clone(),
                        op: *op,
                        value: value.clone(),
                    }),
                );
                Ok(output)
            }
            PredicateNode::And(lhs, rhs) => {
                let narrowed = self.apply_predicate(component, subject, lhs, GraphTarget::Fresh)?;
                self.apply_predicate(component, &narrowed, rhs, target)
            }
            PredicateNode::Or(lhs, rhs) => {
                let left = self.apply_predicate(component, subject, lhs, GraphTarget::Fresh)?;
                let right = self.apply_predicate(component, subject, rhs, GraphTarget::Fresh)?;
                let output = self.materialize_graph(target)?;
                self.push(Instruction::UnionGraph {
                    target: output.clone(),
                    source: left,
                });
                self.push(Instruction::UnionGraph {
                    target: output.clone(),
                    source: right,
                });
                Ok(output)
            }
            PredicateNode::Not(child) => {
                let matching = self.apply_predicate(component, subject, child, GraphTarget::Fresh)?;
                let output = self.materialize_graph(target)?;
                self.push(Instruction::SubtractGraph {
                    target: output.clone(),
                    minuend: subject.clone(),
                    subtrahend: matching,
                    component: Some(component),
                });
                Ok(output)
            }
        }
    }

    fn push_get(
        &mut self,
        component: Component,
        target: Graph,
        subject: Graph,
        filter: Option<FieldComparison>,
    ) {
        let instruction = match component {
            Component::Vertex => Instruction::GetVertex {
                target,
                subject,
                filter,
            },
            Component::Edge => Instruction::GetEdge {
                target,
                subject,
                filter,
            },
        };
        self.push(instruction);
    }

    fn set_metadata(
        &mut self,
        component: MetadataComponent,
        subject: Graph,
        op: &ast::Operation,
        target: Target,
    ) -> Result<Entity> {
        let target = target.into_metadata_target(&op.operator.location)?;
        expect_operands(op, 2)?;
        let name = string_literal(&op.operands[0])?;
        let value = string_literal(&op.operands[1])?;
        let fresh = self.allocate_empty_metadata()?;
        self.push(Instruction::SetGraphMetadata {
            target: fresh.clone(),
            component,
            subject,
            name,
            value,
        });
        match target {
            MetadataTarget::Fresh => Ok(Entity::Metadata(fresh)),
            MetadataTarget::Into(base) => {
                let combined = self.allocate_empty_metadata()?;
                self.push(Instruction::OverwriteGraphMetadata {
                    target: combined.clone(),
                    base,
                    overlay: fresh,
                });
                Ok(Entity::Metadata(combined))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Literal graph construction and raw queries
    // ------------------------------------------------------------------------

    fn insert_literal(
        &mut self,
        component: Component,
        op: &ast::Operation,
        target: Target,
    ) -> Result<Entity> {
        if op.operands.is_empty() {
            bail!(
                "{} expects at least one hash literal at {}",
                op.operator.value,
                op.operator.location
            );
        }
        let values = op
            .operands
            .iter()
            .map(string_literal)
            .collect::<Result<Vec<_>>>()?;
        let target = target.into_graph_target(&op.operator.location)?;
        let output = self.materialize_graph(target)?;
        let instruction = match component {
            Component::Vertex => Instruction::InsertLiteralVertex {
                target: output.clone(),
                vertices: values,
            },
            Component::Edge => Instruction::InsertLiteralEdge {
                target: output.clone(),
                edges: values,
            },
        };
        self.push(instruction);
        Ok(Entity::Graph(output))
    }

    fn as_vertex_or_edge(
        &mut self,
        component: Component,
        op: &ast::Operation,
        target: Target,
    ) -> Result<Entity> {
        expect_operands(op, 1)?;
        let raw = string_literal(&op.operands[0])?;
        let target = target.into_graph_target(&op.operator.location)?;
        let output = self.materialize_graph(target)?;
        let substituted = self.substitute_graph_tables(&raw, op.operands[0].location())?;
        self.push(Instruction::EvaluateQuery {
            query: format!("INSERT INTO {} {}", output.table(component), substituted),
        });
        Ok(Entity::Graph(output))
    }

    /// Rewrite `$var.vertex` / `$var.edge` placeholders in a raw query into
    /// the bound graph's backing table names.
    fn substitute_graph_tables(&self, raw: &str, location: &str) -> Result<String> {
        let pattern = Regex::new(r"\$[A-Za-z0-9_]+\.(vertex|edge)")
            .context("failed to compile placeholder pattern")?;
        let mut result = String::with_capacity(raw.len());
        let mut cursor = 0;
        for found in pattern.find_iter(raw) {
            result.push_str(&raw[cursor..found.start()]);
            let placeholder = found.as_str();
            let (symbol, component) = if let Some(var) = placeholder.strip_suffix(".vertex") {
                (var, Component::Vertex)
            } else if let Some(var) = placeholder.strip_suffix(".edge") {
                (var, Component::Edge)
            } else {
                bail!("Unrecognized placeholder \"{placeholder}\" at {location}");
            };
            let graph = self.env.graph_symbol(symbol).ok_or_else(|| {
                anyhow!("Cannot resolve Graph variable {symbol} in query at {location}")
            })?;
            result.push_str(&graph.table(component));
            cursor = found.end();
        }
        result.push_str(&raw[cursor..]);
        Ok(result)
    }
}

// ============================================================================
// Operand helpers
// ============================================================================

fn binary_operands(op: &ast::Operation) -> Result<(&ast::Expression, &ast::Expression)> {
    if op.operands.len() != 2 {
        bail!(
            "Operator \"{}\" takes 2 operands, found {} at {}",
            op.operator.value,
            op.operands.len(),
            op.operator.location
        );
    }
    Ok((&op.operands[0], &op.operands[1]))
}

fn expect_operands(op: &ast::Operation, count: usize) -> Result<()> {
    if op.operands.len() != count {
        bail!(
            "{} takes {} operand(s), found {} at {}",
            op.operator.value,
            count,
            op.operands.len(),
            op.operator.location
        );
    }
    Ok(())
}

fn integer_literal(expr: &ast::Expression) -> Result<i64> {
    match expr {
        ast::Expression::Literal(literal) => match &literal.value {
            ast::LiteralValue::Integer(value) => Ok(*value),
            ast::LiteralValue::String(_) => {
                bail!("Expected an integer literal at {}", literal.location)
            }
        },
        other => bail!("Expected an integer literal at {}", other.location()),
    }
}

fn string_literal(expr: &ast::Expression) -> Result<String> {
    match expr {
        ast::Expression::Literal(literal) => match &literal.value {
            ast::LiteralValue::String(value) => Ok(value.clone()),
            ast::LiteralValue::Integer(_) => {
                bail!("Expected a string literal at {}", literal.location)
            }
        },
        other => bail!("Expected a string literal at {}", other.location()),
    }
}

fn at(location: &str) -> String {
    format!("at {location}")
}
