use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Field values of an entity, ordered by field name.
///
/// `im::OrdMap` shares structure between clones, so taking an edit snapshot is O(1).
pub type FieldMap = im::OrdMap<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Null or an empty/whitespace-only string.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

// Diffs rely on this: no Integer/Float coercion, and NaN equals NaN so an
// untouched NaN field is never reported as changed.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits() || a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Integer(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            Self::Float(f) => {
                2u8.hash(state);
                // +0.0 and -0.0 compare equal, so they must hash alike
                if *f == 0.0 {
                    0u64.hash(state);
                } else {
                    f.to_bits().hash(state);
                }
            }
            Self::Text(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Self::Boolean(b) => {
                4u8.hash(state);
                b.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Fields whose value in `current` differs from `base`.
///
/// A field present in `base` but missing from `current` is reported as `Null`.
pub fn diff_fields(base: &FieldMap, current: &FieldMap) -> FieldMap {
    let mut diff = FieldMap::new();
    for (name, value) in current.iter() {
        if base.get(name) != Some(value) {
            diff.insert(name.clone(), value.clone());
        }
    }
    for name in base.keys() {
        if !current.contains_key(name) {
            diff.insert(name.clone(), Value::Null);
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_equality_is_strict() {
        assert_eq!(Value::Integer(42), Value::Integer(42));
        assert_ne!(Value::Integer(1), Value::Float(1.0));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Null, Value::Text(String::new()));
    }

    #[test]
    fn test_blank_values() {
        assert!(Value::Null.is_blank());
        assert!(Value::from("   ").is_blank());
        assert!(!Value::from("x").is_blank());
        assert!(!Value::Integer(0).is_blank());
    }

    #[test]
    fn test_diff_reports_changed_added_and_dropped() {
        let base: FieldMap = [
            ("name".to_string(), Value::from("Alice")),
            ("age".to_string(), Value::Integer(30)),
            ("city".to_string(), Value::from("Oslo")),
        ]
        .into_iter()
        .collect();
        let mut current = base.clone();
        current.insert("age".to_string(), Value::Integer(31));
        current.insert("email".to_string(), Value::from("a@example.com"));
        current.remove("city");

        let diff = diff_fields(&base, &current);
        assert_eq!(diff.len(), 3);
        assert_eq!(diff.get("age"), Some(&Value::Integer(31)));
        assert_eq!(diff.get("email"), Some(&Value::from("a@example.com")));
        assert_eq!(diff.get("city"), Some(&Value::Null));
        assert!(diff_fields(&base, &base).is_empty());
    }
}
