//! QuickGrail parse-tree types
//!
//! The surface language is lexed and parsed elsewhere; this crate is the
//! contract between the parser and the resolver. The tree is deliberately
//! small and closed:
//! - a program is a flat list of statements
//! - a statement is either an assignment (`=`, `+=`, `-=`, `&=`) or a
//!   command (`dump`, `stat`, `list`, ...)
//! - expressions cover method calls and pure functions (`Operation`),
//!   `$`/`@`/`%` variable references, literals, and bare names
//!
//! Every node that can appear in an error message carries an opaque
//! `location` string from the parser. The resolver never interprets it
//! beyond echoing it back to the user.

use serde::{Deserialize, Serialize};

// ============================================================================
// Tokens
// ============================================================================

/// A lexed token: its surface text plus a parser-supplied location string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub value: String,
    pub location: String,
}

impl Token {
    pub fn new(value: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            location: location.into(),
        }
    }

    /// Token with no source position, for programmatically built trees.
    pub fn synthetic(value: impl Into<String>) -> Self {
        Self::new(value, "")
    }
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statement {
    Assignment {
        lhs: Variable,
        op: AssignOp,
        rhs: Expression,
    },
    Command {
        name: Token,
        arguments: Vec<Expression>,
    },
}

/// Assignment operators of the surface language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    /// `=`
    Assign,
    /// `+=`
    UnionAssign,
    /// `-=`
    SubtractAssign,
    /// `&=`
    IntersectAssign,
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expression {
    Operation(Operation),
    Variable(Variable),
    Literal(Literal),
    Name(Token),
}

/// A method call (`subject.operator(operands...)`) or a pure function /
/// infix operator (`operator(operands...)`, no subject).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub subject: Option<Box<Expression>>,
    pub operator: Token,
    pub operands: Vec<Expression>,
}

/// Which symbol namespace a variable reference names. The parser maps the
/// `$` / `@` / `%` sigils here; the `name` token keeps the sigil-prefixed
/// surface spelling (`"$a"`, `"@m"`, `"%p"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    Graph,
    Metadata,
    Predicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub kind: VariableKind,
    pub name: Token,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Literal {
    pub value: LiteralValue,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiteralValue {
    Integer(i64),
    String(String),
}

impl Expression {
    /// Location string for diagnostics, taken from the nearest token.
    pub fn location(&self) -> &str {
        match self {
            Expression::Operation(op) => &op.operator.location,
            Expression::Variable(var) => &var.name.location,
            Expression::Literal(lit) => &lit.location,
            Expression::Name(tok) => &tok.location,
        }
    }
}

// ============================================================================
// Builders
// ============================================================================
//
// Convenience constructors for programmatically assembled trees (tests,
// embedded callers). Parsers should attach real locations instead.

impl Expression {
    pub fn graph_var(name: impl Into<String>) -> Self {
        Expression::Variable(Variable {
            kind: VariableKind::Graph,
            name: Token::synthetic(name),
        })
    }

    pub fn metadata_var(name: impl Into<String>) -> Self {
        Expression::Variable(Variable {
            kind: VariableKind::Metadata,
            name: Token::synthetic(name),
        })
    }

    pub fn predicate_var(name: impl Into<String>) -> Self {
        Expression::Variable(Variable {
            kind: VariableKind::Predicate,
            name: Token::synthetic(name),
        })
    }

    pub fn name(value: impl Into<String>) -> Self {
        Expression::Name(Token::synthetic(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expression::Literal(Literal {
            value: LiteralValue::String(value.into()),
            location: String::new(),
        })
    }

    pub fn integer(value: i64) -> Self {
        Expression::Literal(Literal {
            value: LiteralValue::Integer(value),
            location: String::new(),
        })
    }

    /// `subject.method(operands...)`
    pub fn method(subject: Expression, method: impl Into<String>, operands: Vec<Expression>) -> Self {
        Expression::Operation(Operation {
            subject: Some(Box::new(subject)),
            operator: Token::synthetic(method),
            operands,
        })
    }

    /// `operator(operands...)` with no subject, also used for the infix
    /// graph operators `+`, `-`, `&` and the predicate connectives.
    pub fn function(operator: impl Into<String>, operands: Vec<Expression>) -> Self {
        Expression::Operation(Operation {
            subject: None,
            operator: Token::synthetic(operator),
            operands,
        })
    }
}

impl Statement {
    pub fn assign(lhs: Variable, op: AssignOp, rhs: Expression) -> Self {
        Statement::Assignment { lhs, op, rhs }
    }

    pub fn command(name: impl Into<String>, arguments: Vec<Expression>) -> Self {
        Statement::Command {
            name: Token::synthetic(name),
            arguments,
        }
    }
}

impl Variable {
    pub fn graph(name: impl Into<String>) -> Self {
        Variable {
            kind: VariableKind::Graph,
            name: Token::synthetic(name),
        }
    }

    pub fn metadata(name: impl Into<String>) -> Self {
        Variable {
            kind: VariableKind::Metadata,
            name: Token::synthetic(name),
        }
    }

    pub fn predicate(name: impl Into<String>) -> Self {
        Variable {
            kind: VariableKind::Predicate,
            name: Token::synthetic(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_produce_expected_shapes() {
        let expr = Expression::method(
            Expression::graph_var("$base"),
            "getVertex",
            vec![Expression::function(
                "==",
                vec![Expression::name("type"), Expression::string("Process")],
            )],
        );
        let Expression::Operation(op) = &expr else {
            panic!("expected operation");
        };
        assert_eq!(op.operator.value, "getVertex");
        assert_eq!(op.operands.len(), 1);
        assert!(matches!(
            op.subject.as_deref(),
            Some(Expression::Variable(v)) if v.name.value == "$base"
        ));
    }

    #[test]
    fn statements_round_trip_through_json() {
        let program = Program {
            statements: vec![
                Statement::assign(
                    Variable::graph("$a"),
                    AssignOp::UnionAssign,
                    Expression::function("vertices", vec![Expression::string("deadbeef")]),
                ),
                Statement::command("dump", vec![Expression::name("force"), Expression::graph_var("$a")]),
            ],
        };
        let text = serde_json::to_string(&program).expect("serialize program");
        let back: Program = serde_json::from_str(&text).expect("deserialize program");
        assert_eq!(back, program);
    }

    #[test]
    fn location_falls_through_to_nearest_token() {
        let lit = Expression::Literal(Literal {
            value: LiteralValue::Integer(3),
            location: "1:17".into(),
        });
        assert_eq!(lit.location(), "1:17");
        assert_eq!(Expression::graph_var("$x").location(), "");
    }
}
