use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// Raw code of an enumerated field: an integer on the bus, a token in text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnumCode {
    Numeric(u64),
    Token(String),
}

impl fmt::Display for EnumCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(code) => write!(f, "{}", code),
            Self::Token(token) => write!(f, "{}", token),
        }
    }
}

impl Serialize for EnumCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Numeric(code) => serializer.serialize_u64(*code),
            Self::Token(token) => serializer.serialize_str(token),
        }
    }
}

/// One decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Enum { code: EnumCode, label: String },
    /// Code missing from the field's lookup table.
    Unrecognized(EnumCode),
    Bytes(Vec<u8>),
    Record(Record),
    List(Vec<Value>),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Unsigned(v) => Some(*v),
            Self::Signed(v) => u64::try_from(*v).ok(),
            Self::Enum {
                code: EnumCode::Numeric(code),
                ..
            }
            | Self::Unrecognized(EnumCode::Numeric(code)) => Some(*code),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Signed(v) => Some(*v),
            Self::Unsigned(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Unsigned(v) => Some(*v as f64),
            Self::Signed(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Enum { label, .. } => Some(label),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unsigned(v) => serializer.serialize_u64(*v),
            Self::Signed(v) => serializer.serialize_i64(*v),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::Text(text) => serializer.serialize_str(text),
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::Enum { label, .. } => serializer.serialize_str(label),
            Self::Unrecognized(code) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("unrecognized", code)?;
                map.end()
            }
            Self::Bytes(bytes) => serializer.serialize_str(&hex::encode_upper(bytes)),
            Self::Record(record) => record.serialize(serializer),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

/// Ordered mapping of field id to value, in definition order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `id`, replacing an earlier value in place.
    pub fn insert(&mut self, id: impl Into<String>, value: Value) {
        let id = id.into();
        match self.fields.iter_mut().find(|(k, _)| *k == id) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((id, value)),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == id).map(|(_, v)| v)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Follows `path` through nested records; numeric segments index lists.
    ///
    /// ```
    /// # use nmea_codec::{Record, Value};
    /// let mut satellite = Record::new();
    /// satellite.insert("prn", Value::Unsigned(7));
    /// let mut record = Record::new();
    /// record.insert("satellites", Value::List(vec![Value::Record(satellite)]));
    /// assert_eq!(record.deep_get(&["satellites", "0", "prn"]), Some(&Value::Unsigned(7)));
    /// assert_eq!(record.deep_get(&["satellites", "1", "prn"]), None);
    /// ```
    pub fn deep_get(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.get(first)?;
        for segment in rest {
            current = match current {
                Value::Record(record) => record.get(segment)?,
                Value::List(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (id, value) in &self.fields {
            map.serialize_entry(id, value)?;
        }
        map.end()
    }
}

/// Result of feeding one unit to a decoder that may need more input.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Complete(T),
    /// More frames are needed before anything can be returned.
    Pending,
}

impl<T> Outcome<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn complete(self) -> Option<T> {
        match self {
            Self::Complete(value) => Some(value),
            Self::Pending => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Complete(value) => Outcome::Complete(f(value)),
            Self::Pending => Outcome::Pending,
        }
    }
}
