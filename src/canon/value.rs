//! `CanonValue` — a tagged-union "arbitrary value tree" used to represent
//! commitment payload `metadata` (and, internally, the whole canonical
//! image of a commitment) before it is rendered to its canonical byte
//! form.
//!
//! Modelled as an ordered `Vec<(String, CanonValue)>` for objects rather
//! than a `HashMap`/`BTreeMap`: insertion order is preserved for callers
//! that want it back (e.g. re-serializing a proof's embedded commitment
//! verbatim), while canonicalization sorts keys only at encode time.

use std::fmt;

use crate::canon::canonical::CanonError;

#[derive(Clone, Debug, PartialEq)]
pub enum CanonValue {
    Null,
    Bool(bool),
    /// Integral numbers only — the data model has no use for floats and
    /// the canonical encoding forbids fractional/exponential form.
    Number(i64),
    String(String),
    Array(Vec<CanonValue>),
    Object(Vec<(String, CanonValue)>),
}

impl CanonValue {
    pub fn object() -> Self {
        CanonValue::Object(Vec::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: CanonValue) {
        match self {
            CanonValue::Object(entries) => entries.push((key.into(), value)),
            _ => panic!("insert called on a non-object CanonValue"),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CanonValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a `serde_json::Value` (as parsed from user-supplied
    /// metadata) into a `CanonValue`. The canonical encoding has no
    /// fractional or exponential number form, so a non-integer number
    /// anywhere in the tree is rejected rather than silently truncated.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, CanonError> {
        Ok(match value {
            serde_json::Value::Null => CanonValue::Null,
            serde_json::Value::Bool(b) => CanonValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => CanonValue::Number(i),
                None => return Err(CanonError::NonIntegerNumber(n.as_f64().unwrap_or(f64::NAN))),
            },
            serde_json::Value::String(s) => CanonValue::String(s.clone()),
            serde_json::Value::Array(arr) => {
                let items = arr.iter().map(CanonValue::from_json).collect::<Result<Vec<_>, _>>()?;
                CanonValue::Array(items)
            }
            serde_json::Value::Object(map) => {
                let entries = map
                    .iter()
                    .map(|(k, v)| CanonValue::from_json(v).map(|v| (k.clone(), v)))
                    .collect::<Result<Vec<_>, _>>()?;
                CanonValue::Object(entries)
            }
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CanonValue::Null => serde_json::Value::Null,
            CanonValue::Bool(b) => serde_json::Value::Bool(*b),
            CanonValue::Number(n) => serde_json::Value::Number((*n).into()),
            CanonValue::String(s) => serde_json::Value::String(s.clone()),
            CanonValue::Array(arr) => serde_json::Value::Array(arr.iter().map(CanonValue::to_json).collect()),
            CanonValue::Object(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    map.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
        }
    }

    /// Write the canonical byte image of this value: objects have their
    /// keys sorted in code-point order, arrays preserve element order,
    /// strings use standard JSON escaping, numbers have no fractional or
    /// exponential form.
    pub fn write_canonical(&self, out: &mut String) {
        match self {
            CanonValue::Null => out.push_str("null"),
            CanonValue::Bool(true) => out.push_str("true"),
            CanonValue::Bool(false) => out.push_str("false"),
            CanonValue::Number(n) => out.push_str(&n.to_string()),
            CanonValue::String(s) => write_escaped_string(s, out),
            CanonValue::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_canonical(out);
                }
                out.push(']');
            }
            CanonValue::Object(entries) => {
                let mut sorted: Vec<&(String, CanonValue)> = entries.iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(&b.0));
                out.push('{');
                for (i, (key, value)) in sorted.into_iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write_escaped_string(key, out);
                    out.push(':');
                    value.write_canonical(out);
                }
                out.push('}');
            }
        }
    }

    pub fn to_canonical_string(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }
}

impl fmt::Display for CanonValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical_string())
    }
}

fn write_escaped_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_sort_regardless_of_insertion_order() {
        let mut a = CanonValue::object();
        a.insert("b", CanonValue::Number(1));
        a.insert("a", CanonValue::Number(2));

        let mut b = CanonValue::object();
        b.insert("a", CanonValue::Number(2));
        b.insert("b", CanonValue::Number(1));

        assert_eq!(a.to_canonical_string(), b.to_canonical_string());
        assert_eq!(a.to_canonical_string(), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn nested_objects_sort_recursively() {
        let mut inner = CanonValue::object();
        inner.insert("z", CanonValue::Bool(true));
        inner.insert("y", CanonValue::Null);

        let mut outer = CanonValue::object();
        outer.insert("outer_b", inner);
        outer.insert("outer_a", CanonValue::String("x".into()));

        assert_eq!(
            outer.to_canonical_string(),
            r#"{"outer_a":"x","outer_b":{"y":null,"z":true}}"#
        );
    }

    #[test]
    fn arrays_preserve_element_order() {
        let v = CanonValue::Array(vec![
            CanonValue::Number(3),
            CanonValue::Number(1),
            CanonValue::Number(2),
        ]);
        assert_eq!(v.to_canonical_string(), "[3,1,2]");
    }

    #[test]
    fn from_json_accepts_integer_numbers() {
        let value = serde_json::json!({"amount": 5, "nested": [1, -2]});
        let canon = CanonValue::from_json(&value).unwrap();
        assert_eq!(canon.to_canonical_string(), r#"{"amount":5,"nested":[1,-2]}"#);
    }

    #[test]
    fn from_json_rejects_a_non_integer_number_at_the_top_level() {
        let err = CanonValue::from_json(&serde_json::json!(1.5)).unwrap_err();
        assert!(matches!(err, CanonError::NonIntegerNumber(_)));
    }

    #[test]
    fn from_json_rejects_a_non_integer_number_nested_inside_an_object() {
        let err = CanonValue::from_json(&serde_json::json!({"amount": 1.5})).unwrap_err();
        assert!(matches!(err, CanonError::NonIntegerNumber(_)));
    }

    #[test]
    fn strings_are_escaped() {
        let v = CanonValue::String("a\"b\\c\nd".to_string());
        assert_eq!(v.to_canonical_string(), r#""a\"b\\c\nd""#);
    }
}
