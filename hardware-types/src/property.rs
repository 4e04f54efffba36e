//! Dynamically-typed property values mirrored from backend attributes

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A device property map as fetched from a backend in one bulk round-trip.
pub type PropertyMap = HashMap<String, PropertyValue>;

/// One backend-exposed attribute value.
///
/// Backends speak different native encodings (D-Bus variants, sysfs attribute
/// files); everything is normalized into this closed set at the backend
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Text(String),
    TextList(Vec<String>),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view; unsigned values convert when they fit.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            PropertyValue::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PropertyValue::UInt(u) => Some(*u),
            PropertyValue::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Double(d) => Some(*d),
            PropertyValue::Int(i) => Some(*i as f64),
            PropertyValue::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            PropertyValue::TextList(l) => Some(l),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::Int(i) => write!(f, "{i}"),
            PropertyValue::UInt(u) => write!(f, "{u}"),
            PropertyValue::Double(d) => write!(f, "{d}"),
            PropertyValue::Text(s) => write!(f, "{s}"),
            PropertyValue::TextList(l) => write!(f, "{}", l.join(", ")),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<u64> for PropertyValue {
    fn from(v: u64) -> Self {
        PropertyValue::UInt(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Double(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Text(v)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(v: Vec<String>) -> Self {
        PropertyValue::TextList(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_views_convert_between_signs_when_in_range() {
        assert_eq!(PropertyValue::UInt(42).as_i64(), Some(42));
        assert_eq!(PropertyValue::Int(42).as_u64(), Some(42));
        assert_eq!(PropertyValue::Int(-1).as_u64(), None);
        assert_eq!(PropertyValue::UInt(u64::MAX).as_i64(), None);
    }

    #[test]
    fn mismatched_views_return_none() {
        assert_eq!(PropertyValue::Text("yes".into()).as_bool(), None);
        assert_eq!(PropertyValue::Bool(true).as_str(), None);
    }

    #[test]
    fn values_serialize_untagged() {
        assert_eq!(
            serde_json::to_string(&PropertyValue::Text("ext4".into())).unwrap(),
            "\"ext4\""
        );
        assert_eq!(
            serde_json::to_string(&PropertyValue::Bool(true)).unwrap(),
            "true"
        );
        let list: PropertyValue = serde_json::from_str("[\"a\",\"b\"]").unwrap();
        assert_eq!(list, PropertyValue::TextList(vec!["a".into(), "b".into()]));
    }
}
