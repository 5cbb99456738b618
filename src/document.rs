//! Document shape
//!
//! Callers see `pk` and `timestamp`. The store keeps the primary key in `_id`,
//! the timestamp in [`INTERNAL_TIMESTAMP_FIELD`] and a revision token in
//! `_rev`. Conversion happens here and nowhere else.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{EnclaveError, Result};

/// A JSON-like record
pub type Document = Map<String, Value>;

/// Externally visible primary key
pub const PK_FIELD: &str = "pk";

/// Externally visible timestamp
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Store primary key
pub const ID_FIELD: &str = "_id";

/// Store revision token
pub const REV_FIELD: &str = "_rev";

/// Store-side timestamp. Top-level fields starting with `_` are reserved by
/// the store, so this one cannot use the underscore convention.
pub const INTERNAL_TIMESTAMP_FIELD: &str = "sys_timestamp";

/// Payload flag asking `update` to insert when the record is missing
pub const FALLBACK_INSERT_FLAG: &str = "__fallbackToInsert";

/// Id prefix of design documents, hidden from every listing
pub const DESIGN_PREFIX: &str = "_design/";

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Map an external field name to the field the store indexes
pub fn internal_field(field: &str) -> &str {
    match field {
        PK_FIELD => ID_FIELD,
        TIMESTAMP_FIELD => INTERNAL_TIMESTAMP_FIELD,
        other => other,
    }
}

/// Whether an id names a design document
pub fn is_design_document(id: &str) -> bool {
    id.starts_with(DESIGN_PREFIX)
}

/// Remove and report the fallback-insert flag
pub fn take_fallback_flag(doc: &mut Document) -> bool {
    matches!(doc.remove(FALLBACK_INSERT_FLAG), Some(Value::Bool(true)))
}

/// Drop every field a caller is not allowed to set: the system fields, their
/// internal names and any store-reserved underscore field.
pub fn strip_reserved(doc: &mut Document) {
    doc.retain(|key, _| {
        key != PK_FIELD
            && key != TIMESTAMP_FIELD
            && key != INTERNAL_TIMESTAMP_FIELD
            && !key.starts_with('_')
    });
}

/// Build the stored shape of a caller payload
pub fn to_internal(pk: &str, mut doc: Document, timestamp: i64) -> Document {
    strip_reserved(&mut doc);
    doc.insert(ID_FIELD.to_string(), Value::String(pk.to_string()));
    doc.insert(INTERNAL_TIMESTAMP_FIELD.to_string(), Value::from(timestamp));
    doc
}

/// Build the caller-visible shape of a stored document. The revision token
/// and any other store-reserved field are pruned.
pub fn to_external(mut internal: Document) -> Document {
    let id = internal.remove(ID_FIELD);
    let timestamp = internal.remove(INTERNAL_TIMESTAMP_FIELD);
    internal.retain(|key, _| !key.starts_with('_'));

    if let Some(id) = id {
        internal.insert(PK_FIELD.to_string(), id);
    }
    if let Some(timestamp) = timestamp {
        internal.insert(TIMESTAMP_FIELD.to_string(), timestamp);
    }
    internal
}

/// Serialize a struct into a document payload
pub fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(EnclaveError::Internal(format!(
            "expected an object payload, got {}",
            other
        ))),
    }
}

/// Revision token of a stored document
pub fn revision(internal: &Document) -> Option<&str> {
    internal.get(REV_FIELD).and_then(Value::as_str)
}
