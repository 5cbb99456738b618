//! Query translator
//!
//! Pure functions turning textual conditions, a sort key and a limit into a
//! [`FindQuery`]. Entries of the condition list are AND-ed; a single entry may
//! hold an OR group joined by `||`. Only one level of OR is supported.
//!
//! ```
//! use enclave_store::query::{parse, SortSpec};
//!
//! let query = parse(&["rentalPrice >= 200"], Some(SortSpec::asc("rentalPrice")), None).unwrap();
//! assert_eq!(query.limit, 250);
//! ```

pub mod condition;
pub mod selector;
pub mod sort;

pub use condition::{parse_clause, parse_condition, Clause, Condition, Operator};
pub use selector::{compare_values, lookup, Matcher, Selector};
pub use sort::{normalize_limit, SortDirection, SortSpec, DEFAULT_LIMIT};

use serde_json::Value;

use crate::error::Result;

/// A translated query, ready for a backend
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    pub selector: Selector,
    pub sort: SortSpec,
    pub limit: usize,
    pub skip: usize,
}

impl FindQuery {
    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Copy with every field (selector and sort) renamed
    pub fn map_fields<F>(&self, rename: F) -> FindQuery
    where
        F: Fn(&str) -> String,
    {
        FindQuery {
            selector: self.selector.map_fields(&rename),
            sort: SortSpec {
                field: rename(&self.sort.field),
                direction: self.sort.direction,
            },
            limit: self.limit,
            skip: self.skip,
        }
    }
}

/// Translate conditions, sort and limit.
///
/// When the sort field is not tested by any condition a synthetic
/// `field > null` clause is appended so the store can serve the sort from an
/// index on that field.
pub fn parse<S: AsRef<str>>(
    conditions: &[S],
    sort: Option<SortSpec>,
    limit: Option<f64>,
) -> Result<FindQuery> {
    let clauses = conditions
        .iter()
        .map(|c| parse_clause(c.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    let mut selector = Selector::new(clauses);

    let sort = sort.unwrap_or_default();
    if !selector.references(&sort.field) {
        selector.push(Clause::Single(Condition::new(
            sort.field.clone(),
            Operator::Gt,
            Value::Null,
        )));
    }

    Ok(FindQuery {
        selector,
        sort,
        limit: normalize_limit(limit)?,
        skip: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnclaveError;

    #[test]
    fn test_default_sort_adds_index_clause() {
        let query = parse::<&str>(&[], None, None).unwrap();
        assert_eq!(query.sort, SortSpec::asc("timestamp"));
        assert_eq!(query.limit, DEFAULT_LIMIT);
        assert_eq!(
            query.selector.clauses,
            vec![Clause::Single(Condition::new("timestamp", Operator::Gt, Value::Null))]
        );
    }

    #[test]
    fn test_sort_field_already_referenced() {
        let query = parse(&["rentalPrice >= 200"], Some(SortSpec::asc("rentalPrice")), None).unwrap();
        assert_eq!(query.selector.clauses.len(), 1);
    }

    #[test]
    fn test_sort_field_referenced_inside_or_group() {
        let query = parse(
            &["model == Ferrazzi || model == Telsa"],
            Some(SortSpec::desc("model")),
            Some(10.0),
        )
        .unwrap();
        assert_eq!(query.selector.clauses.len(), 1);
        assert_eq!(query.limit, 10);
    }

    #[test]
    fn test_errors_surface_before_anything_else() {
        assert!(matches!(
            parse(&["ok == 1", "broken"], None, None),
            Err(EnclaveError::InvalidQuery(_))
        ));
        assert!(matches!(
            parse(&["ok == 1"], None, Some(1.5)),
            Err(EnclaveError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_map_fields_renames_sort() {
        let query = parse::<&str>(&[], None, None).unwrap().with_skip(5);
        let mapped = query.map_fields(|f| format!("x_{}", f));
        assert_eq!(mapped.sort.field, "x_timestamp");
        assert!(mapped.selector.references("x_timestamp"));
        assert_eq!(mapped.skip, 5);
    }
}
