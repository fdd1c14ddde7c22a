//! Argument literals.
//!
//! Arguments are parsed on the caller's side and shipped to the interpreter
//! thread as plain data, so `Literal` is `Send` while runtime values are not.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ast::{Const, Expr, UnaryOp};
use super::error::{TracerError, TracerResult};
use super::parser::parse_expression;
use super::value::{format_float, Exc, Table, Value};

/// Arguments used when no usable test input is available.
pub const DEFAULT_ARGUMENT_TEXT: &str = "([1, 5, 2],)";

/// A Python literal value (`ast.literal_eval` subset).
///
/// Serialized as its Python `repr` text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Literal>),
    Tuple(Vec<Literal>),
    Set(Vec<Literal>),
    Dict(Vec<(Literal, Literal)>),
}

impl Literal {
    /// Parse a single literal.
    pub fn parse(text: &str) -> TracerResult<Self> {
        let expr = parse_expression(text.trim())?;
        Self::from_expr(&expr)
    }

    fn from_expr(expr: &Expr) -> TracerResult<Self> {
        Ok(match expr {
            Expr::Const(Const::None) => Literal::None,
            Expr::Const(Const::Bool(b)) => Literal::Bool(*b),
            Expr::Const(Const::Int(i)) => Literal::Int(*i),
            Expr::Const(Const::Float(f)) => Literal::Float(*f),
            Expr::Const(Const::Str(s)) => Literal::Str(s.to_string()),
            Expr::Unary(op @ (UnaryOp::Neg | UnaryOp::Pos), operand) => {
                let negate = *op == UnaryOp::Neg;
                match Self::from_expr(operand)? {
                    Literal::Int(i) if negate => Literal::Int(i.checked_neg().ok_or_else(|| {
                        TracerError::MalformedLiteral("integer out of range".into())
                    })?),
                    Literal::Float(f) if negate => Literal::Float(-f),
                    number @ (Literal::Int(_) | Literal::Float(_)) => number,
                    _ => {
                        return Err(TracerError::MalformedLiteral(
                            "unary sign applied to a non-number".into(),
                        ))
                    }
                }
            }
            Expr::List(items) => Literal::List(Self::from_items(items)?),
            Expr::Tuple(items) => Literal::Tuple(Self::from_items(items)?),
            Expr::Set(items) => {
                let items = Self::from_items(items)?;
                if let Some(bad) = items.iter().find(|item| !item.is_hashable()) {
                    return Err(TracerError::MalformedLiteral(format!(
                        "unhashable set element {bad}"
                    )));
                }
                Literal::Set(items)
            }
            Expr::Dict(pairs) => {
                let mut entries = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let key = Self::from_expr(key)?;
                    if !key.is_hashable() {
                        return Err(TracerError::MalformedLiteral(format!(
                            "unhashable dict key {key}"
                        )));
                    }
                    entries.push((key, Self::from_expr(value)?));
                }
                Literal::Dict(entries)
            }
            _ => {
                return Err(TracerError::MalformedLiteral(
                    "only constants and container displays are allowed".into(),
                ))
            }
        })
    }

    fn from_items(items: &[Expr]) -> TracerResult<Vec<Literal>> {
        items.iter().map(Self::from_expr).collect()
    }

    fn is_hashable(&self) -> bool {
        match self {
            Literal::List(_) | Literal::Set(_) | Literal::Dict(_) => false,
            Literal::Tuple(items) => items.iter().all(Literal::is_hashable),
            _ => true,
        }
    }

    /// Materialize as an interpreter value.
    pub(crate) fn to_value(&self) -> Result<Value, Exc> {
        Ok(match self {
            Literal::None => Value::None,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Float(f) => Value::Float(*f),
            Literal::Str(s) => Value::str(s),
            Literal::List(items) => Value::list(Self::values(items)?),
            Literal::Tuple(items) => Value::tuple(Self::values(items)?),
            Literal::Set(items) => {
                let mut table = Table::default();
                for value in Self::values(items)? {
                    table.insert(value.hash_key()?, value, Value::None);
                }
                Value::set(table)
            }
            Literal::Dict(entries) => {
                let mut dict = super::value::PyDict::new(super::value::DictFlavor::Plain);
                for (key, value) in entries {
                    let key = key.to_value()?;
                    dict.table.insert(key.hash_key()?, key, value.to_value()?);
                }
                Value::dict(dict)
            }
        })
    }

    fn values(items: &[Literal]) -> Result<Vec<Value>, Exc> {
        items.iter().map(Literal::to_value).collect()
    }
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Literal]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::None => f.write_str("None"),
            Literal::Bool(true) => f.write_str("True"),
            Literal::Bool(false) => f.write_str("False"),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Float(x) => f.write_str(&format_float(*x)),
            Literal::Str(s) => f.write_str(&Value::str(s).repr()),
            Literal::List(items) => {
                f.write_str("[")?;
                write_items(f, items)?;
                f.write_str("]")
            }
            Literal::Tuple(items) => {
                f.write_str("(")?;
                write_items(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Literal::Set(items) if items.is_empty() => f.write_str("set()"),
            Literal::Set(items) => {
                f.write_str("{")?;
                write_items(f, items)?;
                f.write_str("}")
            }
            Literal::Dict(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<Literal> for String {
    fn from(literal: Literal) -> Self {
        literal.to_string()
    }
}

impl TryFrom<String> for Literal {
    type Error = TracerError;

    fn try_from(text: String) -> TracerResult<Self> {
        Literal::parse(&text)
    }
}

/// Parse a serialized argument tuple; a non-tuple literal becomes a one-element tuple.
pub fn parse_argument_literal(text: &str) -> TracerResult<Vec<Literal>> {
    match Literal::parse(text)? {
        Literal::Tuple(items) => Ok(items),
        single => Ok(vec![single]),
    }
}

/// `([1, 5, 2],)`
pub fn default_arguments() -> Vec<Literal> {
    vec![Literal::List(vec![
        Literal::Int(1),
        Literal::Int(5),
        Literal::Int(2),
    ])]
}

/// Render arguments the way Python prints a call's argument tuple.
pub fn format_arguments(arguments: &[Literal]) -> String {
    Literal::Tuple(arguments.to_vec()).to_string()
}
