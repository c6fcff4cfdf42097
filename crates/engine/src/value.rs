//! Runtime values.
//!
//! Every entity, literal and intermediate result a rule touches is a
//! [`Value`]. Fetched entities are projected into records before they reach
//! the variable context, so path resolution never needs to know the shape of
//! a concrete entity type.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::fmt;

/// Format used when a date-time is rendered as text.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Dynamically-typed rule value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(NaiveDateTime),
    List(Vec<Value>),
    Record(BTreeMap<String, Value>),
}

impl Value {
    /// Returns a human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::List(_) => "list",
            Value::Record(_) => "record",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view, only for int and float values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Record(fields) => Some(fields),
            _ => None,
        }
    }

    /// Field of a record, `None` for anything that is not a record.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_record().and_then(|fields| fields.get(name))
    }

    /// Convert a rule literal. Strings are kept verbatim.
    pub fn from_json(value: &serde_json::Value) -> Self {
        convert_json(value, false)
    }

    /// Project an entity document. Strings in ISO-8601 date or date-time
    /// form become date-time values.
    pub fn project(value: &serde_json::Value) -> Self {
        convert_json(value, true)
    }

    /// Convert back into JSON (date-times become strings).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::json!(i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(dt) => {
                serde_json::Value::String(dt.format(DATETIME_FORMAT).to_string())
            }
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Record(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn convert_json(value: &serde_json::Value, detect_dates: bool) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => {
            if detect_dates {
                if let Some(dt) = parse_datetime(s) {
                    return Value::DateTime(dt);
                }
            }
            Value::String(s.clone())
        }
        serde_json::Value::Array(items) => Value::List(
            items
                .iter()
                .map(|item| convert_json(item, detect_dates))
                .collect(),
        ),
        serde_json::Value::Object(map) => Value::Record(
            map.iter()
                .map(|(k, v)| (k.clone(), convert_json(v, detect_dates)))
                .collect(),
        ),
    }
}

/// Parse an ISO-8601 date or date-time. RFC 3339 offsets are dropped and the
/// wall-clock time kept.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.len() < 10 {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// String form used by equality checks and message substitution.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            Value::List(_) | Value::Record(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Value::Record(fields)
    }
}

/// Typed view of a stored value, used by `VariableContext::try_get`.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_datetime()
    }
}

impl FromValue for Vec<Value> {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_list().map(<[Value]>::to_vec)
    }
}

impl FromValue for BTreeMap<String, Value> {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_record().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project_detects_dates() {
        let doc = json!({
            "Id": 7,
            "StartDate": "2015-01-01T00:00:00",
            "Location": "Berlin",
            "Rate": 1.5
        });

        let value = Value::project(&doc);
        assert_eq!(value.field("Id"), Some(&Value::Int(7)));
        assert!(matches!(value.field("StartDate"), Some(Value::DateTime(_))));
        assert_eq!(value.field("Location"), Some(&Value::from("Berlin")));
        assert_eq!(value.field("Rate"), Some(&Value::Float(1.5)));
    }

    #[test]
    fn test_from_json_keeps_strings() {
        let value = Value::from_json(&json!("2015-01-01"));
        assert_eq!(value, Value::from("2015-01-01"));
    }

    #[test]
    fn test_parse_datetime_formats() {
        let expected = NaiveDate::from_ymd_opt(2022, 12, 31)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(parse_datetime("2022-12-31"), Some(expected));
        assert_eq!(parse_datetime("2022-12-31T00:00:00"), Some(expected));
        assert_eq!(parse_datetime("2022-12-31 00:00:00"), Some(expected));
        assert_eq!(parse_datetime("2022-12-31T00:00:00Z"), Some(expected));
        assert_eq!(parse_datetime("Berlin"), None);
        assert_eq!(parse_datetime("12"), None);
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Float(5.0).to_string(), "5");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(
            Value::project(&json!("2015-01-01")).to_string(),
            "2015-01-01T00:00:00"
        );
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::from("a")]).to_string(),
            r#"[1,"a"]"#
        );
    }

    #[test]
    fn test_to_json_round_trips_records() {
        let doc = json!({"Name": "Ana", "Tags": ["x", "y"], "Employer": null});
        assert_eq!(Value::from_json(&doc).to_json(), doc);
    }

    #[test]
    fn test_from_value_views() {
        assert_eq!(f64::from_value(&Value::Int(3)), Some(3.0));
        assert_eq!(i64::from_value(&Value::Float(3.0)), None);
        assert_eq!(String::from_value(&Value::Int(3)), None);
        assert!(Vec::<Value>::from_value(&Value::List(vec![])).is_some());
    }
}
