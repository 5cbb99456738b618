//! Condition grammar
//!
//! ```text
//! clause    := condition ( "||" condition )*
//! condition := field op value
//! op        := "==" | "!=" | ">" | ">=" | "<" | "<=" | "like"
//! ```
//!
//! Values are coerced: quoted text stays a string with the quotes removed,
//! `true`/`false` (any case) become booleans, numeric text becomes a number and
//! anything else is kept as a string. `like` values are regular expressions
//! matched case-insensitively and are validated here.

use std::fmt;

use regex::RegexBuilder;
use serde_json::{Number, Value};

use crate::error::{EnclaveError, Result};

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
}

impl Operator {
    /// Symbolic operators, longest first so `>=` wins over `>`
    const SYMBOLS: [(&'static str, Operator); 6] = [
        ("==", Operator::Eq),
        ("!=", Operator::Ne),
        (">=", Operator::Gte),
        ("<=", Operator::Lte),
        (">", Operator::Gt),
        ("<", Operator::Lt),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Like => "like",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `field op value` triple
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }
}

/// One entry of the AND list: a single condition or an OR group
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Single(Condition),
    AnyOf(Vec<Condition>),
}

impl Clause {
    /// Conditions in this clause
    pub fn conditions(&self) -> &[Condition] {
        match self {
            Clause::Single(c) => std::slice::from_ref(c),
            Clause::AnyOf(group) => group,
        }
    }

    fn conditions_mut(&mut self) -> &mut [Condition] {
        match self {
            Clause::Single(c) => std::slice::from_mut(c),
            Clause::AnyOf(group) => group,
        }
    }

    /// Whether any condition of this clause tests `field`
    pub fn references(&self, field: &str) -> bool {
        self.conditions().iter().any(|c| c.field == field)
    }

    /// Rename fields in place
    pub fn rename_fields<F>(&mut self, rename: &F)
    where
        F: Fn(&str) -> String,
    {
        for condition in self.conditions_mut() {
            condition.field = rename(&condition.field);
        }
    }
}

/// Parse one condition string, which may be an OR group joined by `||`
pub fn parse_clause(expr: &str) -> Result<Clause> {
    let mut group = expr
        .split("||")
        .map(parse_condition)
        .collect::<Result<Vec<_>>>()?;

    if group.len() == 1 {
        Ok(Clause::Single(group.remove(0)))
    } else {
        Ok(Clause::AnyOf(group))
    }
}

/// Parse a single `field op value` condition
pub fn parse_condition(expr: &str) -> Result<Condition> {
    let invalid = || EnclaveError::InvalidQuery(format!("cannot parse condition '{}'", expr.trim()));

    let trimmed = expr.trim();
    let field_end = trimmed
        .find(|c: char| c.is_whitespace() || matches!(c, '=' | '!' | '<' | '>'))
        .ok_or_else(invalid)?;
    let field = &trimmed[..field_end];
    if field.is_empty() {
        return Err(invalid());
    }

    let rest = trimmed[field_end..].trim_start();
    let (op, raw_value) = split_operator(rest).ok_or_else(invalid)?;
    let raw_value = raw_value.trim();
    if raw_value.is_empty() {
        return Err(invalid());
    }

    let value = match op {
        Operator::Like => {
            let pattern = strip_quotes(raw_value).unwrap_or(raw_value);
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    EnclaveError::InvalidQuery(format!(
                        "invalid regular expression in '{}': {}",
                        trimmed, e
                    ))
                })?;
            Value::String(pattern.to_string())
        }
        _ => coerce_value(raw_value),
    };

    Ok(Condition {
        field: field.to_string(),
        op,
        value,
    })
}

fn split_operator(rest: &str) -> Option<(Operator, &str)> {
    for (symbol, op) in Operator::SYMBOLS {
        if let Some(value) = rest.strip_prefix(symbol) {
            return Some((op, value));
        }
    }

    let keyword = rest.get(..4)?;
    let after = &rest[4..];
    if keyword.eq_ignore_ascii_case("like") && after.starts_with(char::is_whitespace) {
        return Some((Operator::Like, after));
    }
    None
}

fn strip_quotes(raw: &str) -> Option<&str> {
    if raw.len() < 2 {
        return None;
    }
    ['"', '\'']
        .iter()
        .find_map(|q| raw.strip_prefix(*q).and_then(|r| r.strip_suffix(*q)))
}

/// Coerce the textual value of a condition into a JSON value
pub fn coerce_value(raw: &str) -> Value {
    if let Some(inner) = strip_quotes(raw) {
        return Value::String(inner.to_string());
    }
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::from(int);
    }
    if let Some(number) = raw
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
    {
        return Value::Number(number);
    }
    Value::String(raw.to_string())
}
