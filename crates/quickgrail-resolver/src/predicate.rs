//! Predicate trees
//!
//! Filters over vertex/edge annotations, built from the surface language's
//! comparison and connective operators. Trees are immutable values with
//! `Arc` children: cloning shares structure, equality is structural, and a
//! tree stored under a `%var` can be referenced from later queries without
//! deep copies.
//!
//! Persistence is a postfix token stream, space-joined. Terminals (field
//! and comparison value) are wrapped in single quotes and hex-encoded
//! byte-for-byte so they survive any whitespace or quoting in the payload;
//! operators appear verbatim. Decoding is a whitespace tokenizer driving an
//! operand stack.

use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use quickgrail_ast as ast;
use quickgrail_storage::SymbolStore;
use serde::{Deserialize, Serialize};

use crate::environment::Environment;

// ============================================================================
// Comparators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Like,
    Regexp,
}

impl Comparator {
    /// Canonical token, as persisted by the codec.
    pub fn token(&self) -> &'static str {
        match self {
            Comparator::Equal => "=",
            Comparator::NotEqual => "<>",
            Comparator::Less => "<",
            Comparator::LessEqual => "<=",
            Comparator::Greater => ">",
            Comparator::GreaterEqual => ">=",
            Comparator::Like => "like",
            Comparator::Regexp => "regexp",
        }
    }

    /// Parse a canonical token. Surface aliases are not accepted here.
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "=" => Comparator::Equal,
            "<>" => Comparator::NotEqual,
            "<" => Comparator::Less,
            "<=" => Comparator::LessEqual,
            ">" => Comparator::Greater,
            ">=" => Comparator::GreaterEqual,
            "like" => Comparator::Like,
            "regexp" => Comparator::Regexp,
            _ => return None,
        })
    }

    /// Parse a surface-language operator, normalizing the `==` / `!=` /
    /// `~` / `regex` aliases.
    pub fn from_surface(operator: &str) -> Option<Self> {
        Some(match operator {
            "=" | "==" => Comparator::Equal,
            "<>" | "!=" => Comparator::NotEqual,
            "<" => Comparator::Less,
            "<=" => Comparator::LessEqual,
            ">" => Comparator::Greater,
            ">=" => Comparator::GreaterEqual,
            "like" => Comparator::Like,
            "regexp" | "regex" | "~" => Comparator::Regexp,
            _ => return None,
        })
    }
}

// ============================================================================
// Trees
// ============================================================================

/// A filter over one graph component. `field == "*"` matches any field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateNode {
    Compare {
        field: String,
        op: Comparator,
        value: String,
    },
    And(Arc<PredicateNode>, Arc<PredicateNode>),
    Or(Arc<PredicateNode>, Arc<PredicateNode>),
    Not(Arc<PredicateNode>),
}

impl PredicateNode {
    pub fn compare(field: impl Into<String>, op: Comparator, value: impl Into<String>) -> Self {
        PredicateNode::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn and(lhs: PredicateNode, rhs: PredicateNode) -> Self {
        PredicateNode::And(Arc::new(lhs), Arc::new(rhs))
    }

    pub fn or(lhs: PredicateNode, rhs: PredicateNode) -> Self {
        PredicateNode::Or(Arc::new(lhs), Arc::new(rhs))
    }

    pub fn not(child: PredicateNode) -> Self {
        PredicateNode::Not(Arc::new(child))
    }

    // ------------------------------------------------------------------------
    // Codec
    // ------------------------------------------------------------------------

    /// Serialize to the postfix persistence form.
    pub fn encode(&self) -> String {
        let mut tokens = Vec::new();
        self.encode_into(&mut tokens);
        tokens.join(" ")
    }

    fn encode_into(&self, tokens: &mut Vec<String>) {
        match self {
            PredicateNode::Compare { field, op, value } => {
                tokens.push(encode_terminal(field));
                tokens.push(encode_terminal(value));
                tokens.push(op.token().to_string());
            }
            PredicateNode::And(lhs, rhs) => {
                lhs.encode_into(tokens);
                rhs.encode_into(tokens);
                tokens.push("and".to_string());
            }
            PredicateNode::Or(lhs, rhs) => {
                lhs.encode_into(tokens);
                rhs.encode_into(tokens);
                tokens.push("or".to_string());
            }
            PredicateNode::Not(child) => {
                child.encode_into(tokens);
                tokens.push("not".to_string());
            }
        }
    }

    /// Parse a postfix persistence string back into a tree.
    pub fn decode(text: &str) -> Result<Self> {
        enum Operand {
            Terminal(String),
            Tree(PredicateNode),
        }

        fn pop_tree(stack: &mut Vec<Operand>, op: &str) -> Result<PredicateNode> {
            match stack.pop() {
                Some(Operand::Tree(tree)) => Ok(tree),
                Some(Operand::Terminal(_)) | None => {
                    bail!("malformed predicate encoding: \"{op}\" is missing a predicate operand")
                }
            }
        }

        fn pop_terminal(stack: &mut Vec<Operand>, op: &str) -> Result<String> {
            match stack.pop() {
                Some(Operand::Terminal(text)) => Ok(text),
                Some(Operand::Tree(_)) | None => {
                    bail!("malformed predicate encoding: \"{op}\" is missing a terminal operand")
                }
            }
        }

        let mut stack: Vec<Operand> = Vec::new();
        for token in text.split_whitespace() {
            match token {
                "and" => {
                    let rhs = pop_tree(&mut stack, token)?;
                    let lhs = pop_tree(&mut stack, token)?;
                    stack.push(Operand::Tree(PredicateNode::and(lhs, rhs)));
                }
                "or" => {
                    let rhs = pop_tree(&mut stack, token)?;
                    let lhs = pop_tree(&mut stack, token)?;
                    stack.push(Operand::Tree(PredicateNode::or(lhs, rhs)));
                }
                "not" => {
                    let child = pop_tree(&mut stack, token)?;
                    stack.push(Operand::Tree(PredicateNode::not(child)));
                }
                _ => {
                    if let Some(op) = Comparator::from_token(token) {
                        let value = pop_terminal(&mut stack, token)?;
                        let field = pop_terminal(&mut stack, token)?;
                        stack.push(Operand::Tree(PredicateNode::compare(field, op, value)));
                    } else {
                        stack.push(Operand::Terminal(decode_terminal(token)?));
                    }
                }
            }
        }

        match (stack.pop(), stack.is_empty()) {
            (Some(Operand::Tree(tree)), true) => Ok(tree),
            (None, _) => bail!("malformed predicate encoding: empty input"),
            (Some(Operand::Terminal(_)), _) => {
                bail!("malformed predicate encoding: bare terminal with no comparator")
            }
            (Some(Operand::Tree(_)), false) => {
                bail!("malformed predicate encoding: leftover operands after parse")
            }
        }
    }
}

impl fmt::Display for PredicateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredicateNode::Compare { field, op, value } => {
                write!(f, "{field} {} {value}", op.token())
            }
            PredicateNode::And(lhs, rhs) => write!(f, "({lhs} and {rhs})"),
            PredicateNode::Or(lhs, rhs) => write!(f, "({lhs} or {rhs})"),
            PredicateNode::Not(child) => write!(f, "not ({child})"),
        }
    }
}

// ============================================================================
// Terminal hex encoding
// ============================================================================

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

fn encode_terminal(value: &str) -> String {
    let quoted = format!("'{value}'");
    let mut hex = String::with_capacity(quoted.len() * 2);
    for byte in quoted.as_bytes() {
        hex.push(HEX_DIGITS[(byte >> 4) as usize] as char);
        hex.push(HEX_DIGITS[(byte & 0x0f) as usize] as char);
    }
    hex
}

fn decode_terminal(token: &str) -> Result<String> {
    if token.len() % 2 != 0 {
        bail!("malformed predicate terminal \"{token}\": odd hex length");
    }
    let mut bytes = Vec::with_capacity(token.len() / 2);
    for chunk in token.as_bytes().chunks_exact(2) {
        let pair = std::str::from_utf8(chunk).context("predicate terminal is not ASCII hex")?;
        let byte = u8::from_str_radix(pair, 16)
            .map_err(|_| anyhow!("malformed predicate terminal \"{token}\": non-hex digit"))?;
        bytes.push(byte);
    }
    let quoted = String::from_utf8(bytes)
        .map_err(|_| anyhow!("malformed predicate terminal \"{token}\": invalid UTF-8"))?;
    let inner = quoted
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .ok_or_else(|| anyhow!("malformed predicate terminal \"{token}\": missing quotes"))?;
    Ok(inner.to_string())
}

// ============================================================================
// Resolution from the AST
// ============================================================================

/// Lower a surface-language predicate expression into a tree. Referencing a
/// bound `%var` clones the stored tree (structure is shared, not copied).
pub fn resolve_predicate<S: SymbolStore>(
    expr: &ast::Expression,
    env: &Environment<S>,
) -> Result<PredicateNode> {
    match expr {
        ast::Expression::Operation(op) => {
            if let Some(subject) = &op.subject {
                bail!(
                    "Unexpected subject expression in predicate at {}",
                    subject.location()
                );
            }
            match op.operator.value.to_lowercase().as_str() {
                "and" => {
                    let (lhs, rhs) = binary_operands(op)?;
                    Ok(PredicateNode::and(
                        resolve_predicate(lhs, env)?,
                        resolve_predicate(rhs, env)?,
                    ))
                }
                "or" => {
                    let (lhs, rhs) = binary_operands(op)?;
                    Ok(PredicateNode::or(
                        resolve_predicate(lhs, env)?,
                        resolve_predicate(rhs, env)?,
                    ))
                }
                "not" => {
                    if op.operands.len() != 1 {
                        bail!(
                            "Operator \"not\" takes 1 operand, found {} at {}",
                            op.operands.len(),
                            op.operator.location
                        );
                    }
                    Ok(PredicateNode::not(resolve_predicate(&op.operands[0], env)?))
                }
                other => {
                    let Some(cmp) = Comparator::from_surface(other) else {
                        bail!(
                            "Unexpected operator \"{}\" in predicate at {}",
                            op.operator.value,
                            op.operator.location
                        );
                    };
                    let (lhs, rhs) = binary_operands(op)?;
                    let field = match lhs {
                        ast::Expression::Name(token) => token.value.clone(),
                        other => bail!(
                            "Expected a field name on the left of \"{}\" at {}",
                            op.operator.value,
                            other.location()
                        ),
                    };
                    let value = match rhs {
                        ast::Expression::Literal(literal) => match &literal.value {
                            ast::LiteralValue::String(text) => text.clone(),
                            ast::LiteralValue::Integer(n) => n.to_string(),
                        },
                        other => bail!(
                            "Expected a literal on the right of \"{}\" at {}",
                            op.operator.value,
                            other.location()
                        ),
                    };
                    Ok(PredicateNode::compare(field, cmp, value))
                }
            }
        }
        ast::Expression::Variable(var) if var.kind == ast::VariableKind::Predicate => env
            .predicate_symbol(&var.name.value)?
            .ok_or_else(|| {
                anyhow!(
                    "Cannot resolve Predicate variable {} at {}",
                    var.name.value,
                    var.name.location
                )
            }),
        other => bail!("Unexpected expression in predicate at {}", other.location()),
    }
}

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

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn comparator_aliases_normalize() {
        assert_eq!(Comparator::from_surface("=="), Some(Comparator::Equal));
        assert_eq!(Comparator::from_surface("!="), Some(Comparator::NotEqual));
        assert_eq!(Comparator::from_surface("~"), Some(Comparator::Regexp));
        assert_eq!(Comparator::from_surface("regex"), Some(Comparator::Regexp));
        assert_eq!(Comparator::from_surface("between"), None);
        // canonical parsing refuses aliases
        assert_eq!(Comparator::from_token("=="), None);
        assert_eq!(Comparator::from_token("like"), Some(Comparator::Like));
    }

    #[test]
    fn encode_known_leaf() {
        let node = PredicateNode::compare("a", Comparator::Equal, "b");
        // 'a' = 0x27 0x61 0x27, 'b' = 0x27 0x62 0x27
        assert_eq!(node.encode(), "276127 276227 =");
        assert_eq!(PredicateNode::decode("276127 276227 =").unwrap(), node);
    }

    #[test]
    fn terminals_survive_whitespace_and_quotes() {
        let node = PredicateNode::compare("name", Comparator::Like, "a b 'c' d");
        let round = PredicateNode::decode(&node.encode()).unwrap();
        assert_eq!(round, node);
    }

    #[test]
    fn decode_rejects_malformed_streams() {
        assert!(PredicateNode::decode("").is_err());
        // operator with no operands
        assert!(PredicateNode::decode("and").is_err());
        // bare terminal with no comparator
        assert!(PredicateNode::decode("276127").is_err());
        // two trees left on the stack
        let leaf = PredicateNode::compare("a", Comparator::Equal, "b").encode();
        assert!(PredicateNode::decode(&format!("{leaf} {leaf}")).is_err());
        // non-hex terminal
        assert!(PredicateNode::decode("27zz27 276227 =").is_err());
        // hex without the quote wrapper
        assert!(PredicateNode::decode("6161 276227 =").is_err());
        // comparator needs terminals, not subtrees
        assert!(PredicateNode::decode(&format!("{leaf} {leaf} =")).is_err());
    }

    #[test]
    fn display_is_parenthesized_infix() {
        let node = PredicateNode::or(
            PredicateNode::and(
                PredicateNode::compare("type", Comparator::Equal, "Process"),
                PredicateNode::compare("pid", Comparator::Greater, "100"),
            ),
            PredicateNode::not(PredicateNode::compare("*", Comparator::Like, "%ssh%")),
        );
        assert_eq!(
            node.to_string(),
            "((type = Process and pid > 100) or not (* like %ssh%))"
        );
    }

    #[test]
    fn clones_share_structure() {
        let node = PredicateNode::not(PredicateNode::compare("a", Comparator::Equal, "b"));
        let copy = node.clone();
        assert_eq!(copy, node);
        let (PredicateNode::Not(lhs), PredicateNode::Not(rhs)) = (&node, &copy) else {
            panic!("expected not nodes");
        };
        assert!(Arc::ptr_eq(lhs, rhs));
    }

    fn arb_comparator() -> impl Strategy<Value = Comparator> {
        prop_oneof![
            Just(Comparator::Equal),
            Just(Comparator::NotEqual),
            Just(Comparator::Less),
            Just(Comparator::LessEqual),
            Just(Comparator::Greater),
            Just(Comparator::GreaterEqual),
            Just(Comparator::Like),
            Just(Comparator::Regexp),
        ]
    }

    fn arb_predicate() -> impl Strategy<Value = PredicateNode> {
        let leaf = ("[a-z*]{1,8}", arb_comparator(), "[ -~]{0,16}")
            .prop_map(|(field, op, value)| PredicateNode::compare(field, op, value));
        leaf.prop_recursive(4, 32, 2, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone())
                    .prop_map(|(lhs, rhs)| PredicateNode::and(lhs, rhs)),
                (inner.clone(), inner.clone()).prop_map(|(lhs, rhs)| PredicateNode::or(lhs, rhs)),
                inner.prop_map(PredicateNode::not),
            ]
        })
    }

    proptest! {
        #[test]
        fn codec_round_trips(node in arb_predicate()) {
            let encoded = node.encode();
            let decoded = PredicateNode::decode(&encoded).unwrap();
            prop_assert_eq!(decoded, node);
        }
    }
}
