//! Sort keys and result limits

use std::fmt;

use serde_json::Value;

use crate::document::TIMESTAMP_FIELD;
use crate::error::{EnclaveError, Result};

/// Page size used when the caller gives no limit, or asks for an unbounded one
pub const DEFAULT_LIMIT: usize = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.eq_ignore_ascii_case("asc") {
            Ok(SortDirection::Asc)
        } else if raw.eq_ignore_ascii_case("desc") {
            Ok(SortDirection::Desc)
        } else {
            Err(EnclaveError::InvalidQuery(format!(
                "sort direction must be 'asc' or 'desc', got '{}'",
                raw
            )))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::asc(TIMESTAMP_FIELD)
    }
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Parse the JSON form callers send.
    ///
    /// Accepted shapes: `"asc"`/`"desc"` (sorts on `timestamp`),
    /// `{"field": "asc"}` and `[{"field": "asc"}]`. `null` or an empty array
    /// yields `None` so the default applies.
    pub fn from_json(value: &Value) -> Result<Option<Self>> {
        match value {
            Value::Null => Ok(None),
            Value::String(direction) => Ok(Some(Self {
                field: TIMESTAMP_FIELD.to_string(),
                direction: SortDirection::parse(direction)?,
            })),
            Value::Object(map) => {
                let mut entries = map.iter();
                match (entries.next(), entries.next()) {
                    (Some((field, Value::String(direction))), None) => Ok(Some(Self {
                        field: field.clone(),
                        direction: SortDirection::parse(direction)?,
                    })),
                    _ => Err(EnclaveError::InvalidQuery(format!(
                        "sort must be a single {{field: direction}} pair, got {}",
                        value
                    ))),
                }
            }
            Value::Array(items) => match items.as_slice() {
                [] => Ok(None),
                [single] => Self::from_json(single),
                _ => Err(EnclaveError::InvalidQuery(
                    "only one sort key is supported".to_string(),
                )),
            },
            other => Err(EnclaveError::InvalidQuery(format!(
                "unsupported sort specification {}",
                other
            ))),
        }
    }
}

/// Normalize a caller limit.
///
/// `None` and infinite limits become [`DEFAULT_LIMIT`]; NaN, negative and
/// fractional limits are rejected.
pub fn normalize_limit(limit: Option<f64>) -> Result<usize> {
    let Some(limit) = limit else {
        return Ok(DEFAULT_LIMIT);
    };

    if limit.is_infinite() && limit > 0.0 {
        return Ok(DEFAULT_LIMIT);
    }
    if limit.is_nan() || limit < 0.0 || limit.fract() != 0.0 || limit > usize::MAX as f64 {
        return Err(EnclaveError::InvalidQuery(format!(
            "limit must be a non-negative integer, got {}",
            limit
        )));
    }
    Ok(limit as usize)
}
