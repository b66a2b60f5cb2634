//! Host record adapter.
//!
//! The allocation protocol only needs three things from a record: whether it
//! is being persisted for the first time, the numbered field's current value,
//! and a way to write a generated value back. [`SequencedRecord`] captures
//! that; the `serde_json` object impl covers document-shaped hosts.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// A record a [`crate::Sequence`] can number.
pub trait SequencedRecord {
    /// True when the record has never been persisted.
    fn is_new(&self) -> bool {
        true
    }

    /// The value currently held in `field`.
    ///
    /// `Ok(None)` means "no explicit value": absent, null or non-numeric.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFieldValue`] for numbers that are not
    /// integers representable as `i64`.
    fn sequence_value(&self, field: &str) -> CoreResult<Option<i64>>;

    /// Writes a generated value into `field`.
    fn set_sequence_value(&mut self, field: &str, value: i64);
}

fn integer_of(field: &str, number: &Number) -> CoreResult<i64> {
    if let Some(value) = number.as_i64() {
        return Ok(value);
    }
    let invalid = || CoreError::InvalidFieldValue {
        field: field.to_string(),
        value: number.to_string(),
    };
    let float = number.as_f64().ok_or_else(invalid)?;
    // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
    if float.fract() != 0.0 || float < i64::MIN as f64 || float >= i64::MAX as f64 {
        return Err(invalid());
    }
    #[allow(clippy::cast_possible_truncation)]
    Ok(float as i64)
}

impl SequencedRecord for Map<String, Value> {
    fn sequence_value(&self, field: &str) -> CoreResult<Option<i64>> {
        match self.get(field) {
            Some(Value::Number(number)) => integer_of(field, number).map(Some),
            _ => Ok(None),
        }
    }

    fn set_sequence_value(&mut self, field: &str, value: i64) {
        self.insert(field.to_string(), Value::from(value));
    }
}

/// A JSON object plus its persistence state.
///
/// ```rust
/// use autoinc_core::{Document, SequencedRecord};
/// use serde_json::json;
///
/// let doc = Document::persisted(json!({ "_id": 7 }).as_object().unwrap().clone());
/// assert!(!doc.is_new());
/// assert_eq!(doc.sequence_value("_id").unwrap(), Some(7));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Field values.
    pub fields: Map<String, Value>,
    /// Whether the document still awaits its first save.
    #[serde(default = "default_is_new")]
    pub is_new: bool,
}

const fn default_is_new() -> bool {
    true
}

impl Document {
    /// A document about to be saved for the first time.
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            is_new: true,
        }
    }

    /// A document that has been saved before.
    #[must_use]
    pub fn persisted(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            is_new: false,
        }
    }
}

impl SequencedRecord for Document {
    fn is_new(&self) -> bool {
        self.is_new
    }

    fn sequence_value(&self, field: &str) -> CoreResult<Option<i64>> {
        self.fields.sequence_value(field)
    }

    fn set_sequence_value(&mut self, field: &str, value: i64) {
        self.fields.set_sequence_value(field, value);
    }
}
