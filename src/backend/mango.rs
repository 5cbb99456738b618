//! Selector to Mango JSON
//!
//! The only place that knows the HTTP store's query dialect. Swapping the
//! store means swapping this rendering, not the translator.

use serde_json::{json, Map, Value};

use crate::query::{Clause, Condition, FindQuery, Operator, Selector};

fn operator_key(op: Operator) -> &'static str {
    match op {
        Operator::Eq => "$eq",
        Operator::Ne => "$ne",
        Operator::Gt => "$gt",
        Operator::Gte => "$gte",
        Operator::Lt => "$lt",
        Operator::Lte => "$lte",
        Operator::Like => "$regex",
    }
}

fn condition_to_mango(condition: &Condition) -> Value {
    let operand = match (condition.op, &condition.value) {
        (Operator::Like, Value::String(pattern)) => Value::String(format!("(?i){}", pattern)),
        _ => condition.value.clone(),
    };

    let mut test = Map::new();
    test.insert(operator_key(condition.op).to_string(), operand);

    let mut outer = Map::new();
    outer.insert(condition.field.clone(), Value::Object(test));
    Value::Object(outer)
}

fn clause_to_mango(clause: &Clause) -> Value {
    match clause {
        Clause::Single(condition) => condition_to_mango(condition),
        Clause::AnyOf(group) => json!({
            "$or": group.iter().map(condition_to_mango).collect::<Vec<_>>()
        }),
    }
}

/// Render a selector tree
pub fn selector_to_mango(selector: &Selector) -> Value {
    match selector.clauses.as_slice() {
        [] => json!({}),
        [single] => clause_to_mango(single),
        many => json!({
            "$and": many.iter().map(clause_to_mango).collect::<Vec<_>>()
        }),
    }
}

/// Body of a `POST /{db}/_find` request
pub fn find_body(query: &FindQuery) -> Value {
    let mut sort = Map::new();
    sort.insert(
        query.sort.field.clone(),
        Value::String(query.sort.direction.as_str().to_string()),
    );

    json!({
        "selector": selector_to_mango(&query.selector),
        "sort": [Value::Object(sort)],
        "limit": query.limit,
        "skip": query.skip,
    })
}

/// Body of a `POST /{db}/_index` request
pub fn index_body(fields: &[String]) -> Value {
    json!({
        "index": { "fields": fields },
        "name": format!("idx_{}", fields.join("_")),
        "type": "json",
    })
}
