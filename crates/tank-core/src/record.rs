use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Scalar carried by filters and read out of records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Default for Value {
    fn default() -> Self {
        Value::Text(String::new())
    }
}

impl Value {
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Value::Text(s) => Cow::Borrowed(s.as_str()),
            other => Cow::Owned(other.to_string()),
        }
    }

    /// Ordering between two values of the same variant; mixed variants do not compare.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Text,
    Bool,
    /// Stored and compared as `YYYY-MM-DD` text.
    Date,
}

impl ColumnType {
    /// Convert a filter value into this column's representation, if it has one.
    pub fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ColumnType::Integer, Value::Int(_)) | (ColumnType::Bool, Value::Bool(_)) => {
                Some(value.clone())
            }
            (ColumnType::Integer, Value::Bool(b)) => Some(Value::Int(i64::from(*b))),
            (ColumnType::Integer, Value::Text(s)) => s.trim().parse().ok().map(Value::Int),
            (ColumnType::Bool, Value::Int(i)) => Some(Value::Bool(*i != 0)),
            (ColumnType::Bool, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            (ColumnType::Text, v) => Some(Value::Text(v.as_text().into_owned())),
            (ColumnType::Date, Value::Text(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .ok()
                .map(|d| Value::Text(d.to_string())),
            (ColumnType::Date, _) => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ColumnType::Integer => "integer",
            ColumnType::Text => "text",
            ColumnType::Bool => "boolean",
            ColumnType::Date => "date (YYYY-MM-DD)",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnType,
}

impl Column {
    pub const fn new(name: &'static str, kind: ColumnType) -> Self {
        Self { name, kind }
    }
}

/// A flat record schema served by one table.
///
/// Everything schema-specific lives here: the column list, the key column and
/// the filter allow-list. Store, query layer, merger and service are generic
/// over it.
pub trait Record:
    Serialize + DeserializeOwned + Clone + Default + PartialEq + fmt::Debug + Send + Sync + 'static
{
    type Key: Ord
        + Clone
        + fmt::Display
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// Singular name used in caller-facing messages.
    const NAME: &'static str;
    /// Table name; also names the WAL file.
    const TABLE: &'static str;
    /// Key column.
    const KEY: &'static str;
    /// Every column, key first.
    const COLUMNS: &'static [Column];
    /// Filter keys accepted by list, each mapped to the column it constrains.
    const FILTER_KEYS: &'static [(&'static str, &'static str)];

    fn key(&self) -> Self::Key;

    /// Whether `key` is the "unset" value callers may not create.
    fn key_is_unset(key: &Self::Key) -> bool;

    fn value(&self, column: &str) -> Option<Value>;

    /// Copy one non-key field from `other`. Returns false for the key or unknown names.
    fn copy_field(&mut self, other: &Self, field: &str) -> bool;

    /// Domain invariants a stored record must satisfy.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    fn column(name: &str) -> Option<&'static Column> {
        Self::COLUMNS.iter().find(|c| c.name == name)
    }

    fn filter_column(key: &str) -> Option<&'static Column> {
        Self::FILTER_KEYS
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, column)| Self::column(column))
    }

    /// Fields a partial update may overwrite.
    fn mutable_fields() -> Vec<&'static str> {
        Self::COLUMNS
            .iter()
            .map(|c| c.name)
            .filter(|name| *name != Self::KEY)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_follows_column_type() {
        assert_eq!(
            ColumnType::Integer.coerce(&Value::from("50")),
            Some(Value::Int(50))
        );
        assert_eq!(ColumnType::Integer.coerce(&Value::from("fifty")), None);
        assert_eq!(
            ColumnType::Bool.coerce(&Value::from("TRUE")),
            Some(Value::Bool(true))
        );
        assert_eq!(
            ColumnType::Text.coerce(&Value::Int(7)),
            Some(Value::from("7"))
        );
        assert_eq!(
            ColumnType::Date.coerce(&Value::from("2024-03-01")),
            Some(Value::from("2024-03-01"))
        );
        assert_eq!(ColumnType::Date.coerce(&Value::from("03/01/2024")), None);
    }

    #[test]
    fn mixed_variants_do_not_compare() {
        assert_eq!(Value::Int(1).compare(&Value::from("1")), None);
        assert_eq!(
            Value::Bool(false).compare(&Value::Bool(true)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn untagged_json_maps_to_scalars() {
        let v: Vec<Value> = serde_json::from_str(r#"[true, 12, "x"]"#).unwrap();
        assert_eq!(v, vec![Value::Bool(true), Value::Int(12), Value::from("x")]);
    }
}
