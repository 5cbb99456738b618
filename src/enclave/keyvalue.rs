//! Typed key-value table
//!
//! Values are stored tagged with their runtime type so they read back as the
//! same variant. Byte buffers travel as base64.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use tracing::debug;

use super::{Enclave, Scope};
use crate::collection::with_fallback;
use crate::document::Document;
use crate::error::{EnclaveError, Result};

/// Logical collection backing the table
pub const KEY_VALUE_COLLECTION: &str = "keyvalue";

/// Field holding the tagged value inside the record
const ENTRY_FIELD: &str = "entry";

/// A value of the key-value table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum StoredValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Json(Value),
}

impl From<bool> for StoredValue {
    fn from(value: bool) -> Self {
        StoredValue::Bool(value)
    }
}

impl From<i64> for StoredValue {
    fn from(value: i64) -> Self {
        StoredValue::Number(value.into())
    }
}

impl From<&str> for StoredValue {
    fn from(value: &str) -> Self {
        StoredValue::String(value.to_string())
    }
}

impl From<String> for StoredValue {
    fn from(value: String) -> Self {
        StoredValue::String(value)
    }
}

impl From<Vec<u8>> for StoredValue {
    fn from(value: Vec<u8>) -> Self {
        StoredValue::Bytes(value)
    }
}

impl From<Value> for StoredValue {
    /// Primitives map to their own variant, arrays and objects to `Json`
    fn from(value: Value) -> Self {
        match value {
            Value::Null => StoredValue::Null,
            Value::Bool(b) => StoredValue::Bool(b),
            Value::Number(n) => StoredValue::Number(n),
            Value::String(s) => StoredValue::String(s),
            other => StoredValue::Json(other),
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

impl Enclave {
    /// Store a value under `key`, replacing any previous value
    pub async fn write_key(&self, scope: &Scope, key: &str, value: StoredValue) -> Result<()> {
        self.guard("write_key")?;
        debug!(scope = %scope, key = %key, "write_key");

        let mut doc = Document::new();
        doc.insert(ENTRY_FIELD.to_string(), serde_json::to_value(&value)?);
        self.collection(KEY_VALUE_COLLECTION, true)
            .await?
            .update(key, with_fallback(doc))
            .await?;
        Ok(())
    }

    /// Read the value stored under `key`
    pub async fn read_key(&self, scope: &Scope, key: &str) -> Result<StoredValue> {
        self.guard("read_key")?;
        debug!(scope = %scope, key = %key, "read_key");

        let mut doc = self
            .collection(KEY_VALUE_COLLECTION, false)
            .await?
            .read(key)
            .await?;
        let entry = doc.remove(ENTRY_FIELD).ok_or_else(|| {
            EnclaveError::Internal(format!("key {} has no stored value", key))
        })?;
        Ok(serde_json::from_value(entry)?)
    }
}
