//! Selector tree
//!
//! An AND list of clauses, each a single condition or a one-level OR group.
//! The tree carries no store dialect; `backend::mango` renders it for the HTTP
//! store and [`Selector::matches`] evaluates it in process using the store's
//! collation order (null < false < true < numbers < strings < arrays < objects).

use std::cmp::Ordering;
use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use super::condition::{Clause, Condition, Operator};
use crate::document::Document;

/// AND list of clauses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    pub clauses: Vec<Clause>,
}

impl Selector {
    pub fn new(clauses: Vec<Clause>) -> Self {
        Self { clauses }
    }

    pub fn push(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Whether any clause tests `field`
    pub fn references(&self, field: &str) -> bool {
        self.clauses.iter().any(|c| c.references(field))
    }

    /// Copy of this selector with every field renamed
    pub fn map_fields<F>(&self, rename: F) -> Selector
    where
        F: Fn(&str) -> String,
    {
        let mut mapped = self.clone();
        for clause in &mut mapped.clauses {
            clause.rename_fields(&rename);
        }
        mapped
    }

    /// Evaluate against a document
    pub fn matches(&self, doc: &Document) -> bool {
        self.matcher().matches(doc)
    }

    /// Evaluator with every `like` pattern compiled once, for scanning many
    /// documents
    pub fn matcher(&self) -> Matcher<'_> {
        let mut patterns = HashMap::new();
        let conditions = self.clauses.iter().flat_map(Clause::conditions);
        for condition in conditions.filter(|c| c.op == Operator::Like) {
            if let Value::String(pattern) = &condition.value {
                if let Ok(re) = RegexBuilder::new(pattern).case_insensitive(true).build() {
                    patterns.entry(pattern.clone()).or_insert(re);
                }
            }
        }
        Matcher {
            selector: self,
            patterns,
        }
    }
}

/// A selector with its `like` patterns compiled
#[derive(Debug)]
pub struct Matcher<'a> {
    selector: &'a Selector,
    patterns: HashMap<String, Regex>,
}

impl Matcher<'_> {
    pub fn matches(&self, doc: &Document) -> bool {
        self.selector.clauses.iter().all(|clause| match clause {
            Clause::Single(condition) => self.condition_matches(condition, doc),
            Clause::AnyOf(group) => group.iter().any(|c| self.condition_matches(c, doc)),
        })
    }

    /// Number of distinct compiled patterns
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    fn condition_matches(&self, condition: &Condition, doc: &Document) -> bool {
        let Some(actual) = lookup(doc, &condition.field) else {
            return false;
        };

        match condition.op {
            Operator::Eq => compare_values(actual, &condition.value) == Ordering::Equal,
            Operator::Ne => compare_values(actual, &condition.value) != Ordering::Equal,
            Operator::Gt => compare_values(actual, &condition.value) == Ordering::Greater,
            Operator::Gte => compare_values(actual, &condition.value) != Ordering::Less,
            Operator::Lt => compare_values(actual, &condition.value) == Ordering::Less,
            Operator::Lte => compare_values(actual, &condition.value) != Ordering::Greater,
            Operator::Like => match (actual, &condition.value) {
                (Value::String(text), Value::String(pattern)) => self
                    .patterns
                    .get(pattern)
                    .map_or(false, |re| re.is_match(text)),
                _ => false,
            },
        }
    }
}

/// Resolve a dotted path inside a document
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// Total order over JSON values following the store's view collation
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(l, r)| compare_values(l, r))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x
            .iter()
            .zip(y.iter())
            .map(|((lk, lv), (rk, rv))| lk.cmp(rk).then_with(|| compare_values(lv, rv)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => Ordering::Equal,
    }
}
