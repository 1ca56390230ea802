//! Record and field value types.

use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A scalar field value copied from a remote record.
///
/// Enumerations are carried as [`FieldValue::Text`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Absent or empty value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Free text or enum label.
    Text(String),
    /// Point in time, UTC.
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// Builds a text value, or `Null` for `None`.
    pub fn text_or_null(value: Option<impl Into<String>>) -> Self {
        value.map_or(FieldValue::Null, |v| FieldValue::Text(v.into()))
    }

    /// Returns the text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true for [`FieldValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Integer(i) => write!(f, "{i}"),
            FieldValue::Float(x) => write!(f, "{x}"),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Timestamp(t) => f.write_str(&t.to_rfc3339()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

/// Named fields of a record, sorted by name.
///
/// The sorted order keeps the stored JSON byte-identical for identical
/// records.
pub type Fields = BTreeMap<String, FieldValue>;

/// An external entity mirrored into a local table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Identifier assigned by the remote API. Unique within a table.
    pub external_id: String,
    /// Field values keyed by field name.
    pub fields: Fields,
    /// Last modification time reported by the remote API.
    pub last_modified: Option<DateTime<Utc>>,
}

impl Record {
    /// Creates a record with no fields.
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            fields: Fields::new(),
            last_modified: None,
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets the last-modified timestamp.
    #[must_use]
    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    /// Looks up a field.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Checks that every field can be stored and read back.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidField`] for NaN or infinite floats,
    /// which JSON cannot represent.
    pub fn validate(&self) -> StorageResult<()> {
        for (name, value) in &self.fields {
            if let FieldValue::Float(x) = value {
                if !x.is_finite() {
                    return Err(StorageError::InvalidField {
                        external_id: self.external_id.clone(),
                        field: name.clone(),
                        reason: format!("non-finite float {x}"),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn builder_sets_fields() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let record = Record::new("42")
            .with_field("name", "Susan Glenn")
            .with_field("amount", 1500_i64)
            .with_last_modified(at);

        assert_eq!(record.external_id, "42");
        assert_eq!(record.field("name").and_then(FieldValue::as_text), Some("Susan Glenn"));
        assert_eq!(record.field("amount"), Some(&FieldValue::Integer(1500)));
        assert_eq!(record.last_modified, Some(at));
    }

    #[test]
    fn field_json_is_tagged_and_sorted() {
        let record = Record::new("1")
            .with_field("zeta", FieldValue::Null)
            .with_field("alpha", true);
        let json = serde_json::to_string(&record.fields).unwrap();
        assert_eq!(
            json,
            r#"{"alpha":{"type":"bool","value":true},"zeta":{"type":"null"}}"#
        );
    }

    #[test]
    fn timestamp_survives_json() {
        let at = Utc.with_ymd_and_hms(2025, 10, 17, 9, 30, 0).unwrap();
        let value = FieldValue::Timestamp(at);
        let json = serde_json::to_string(&value).unwrap();
        let back: FieldValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn non_finite_floats_are_rejected() {
        assert!(Record::new("1").with_field("v", 2.5).validate().is_ok());
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = Record::new("1").with_field("v", bad).validate().unwrap_err();
            assert!(matches!(err, StorageError::InvalidField { ref field, .. } if field == "v"));
        }
    }

    #[test]
    fn text_or_null() {
        assert_eq!(FieldValue::text_or_null(Some("x")), FieldValue::Text("x".into()));
        assert!(FieldValue::text_or_null(None::<String>).is_null());
    }
}
