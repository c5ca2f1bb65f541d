//! Deterministic request fingerprints.
//!
//! A signature is a JSON-like rendering of arbitrary input with object keys
//! sorted, so two inputs that differ only in key order produce the same
//! string. The fetcher compares signatures to decide whether a request is a
//! duplicate of the one already running for a key.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Marker emitted where a value refers back to one of its ancestors.
pub const CIRCULAR: &str = "[Circular]";
/// Marker emitted for function values.
pub const FUNCTION: &str = "[Function]";
/// Marker emitted for undefined values.
pub const UNDEFINED: &str = "[Undefined]";
/// Signature of input that could not be serialized at all.
pub const UNSTRINGIFIABLE: &str = "[Unstringifiable]";

/// Loosely typed input tree.
///
/// Covers what plain JSON cannot: dates, integers wider than `i64`,
/// placeholders for functions and undefined, and shared nodes that may form
/// cycles.
#[derive(Debug, Clone)]
pub enum Datum {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    BigInt(i128),
    Float(f64),
    Str(String),
    Date(DateTime<Utc>),
    Function,
    Array(Vec<Datum>),
    /// Object entries in insertion order.
    Object(Vec<(String, Datum)>),
    /// Node that can be referenced from several places, including itself.
    Shared(Rc<RefCell<Datum>>),
}

impl Datum {
    /// Wrap a datum so it can be referenced more than once.
    pub fn shared(inner: Datum) -> Rc<RefCell<Datum>> {
        Rc::new(RefCell::new(inner))
    }
}

impl From<&Value> for Datum {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => Self::Int(i),
                (None, Some(u)) => Self::BigInt(i128::from(u)),
                _ => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::Str(s.clone()),
            Value::Array(items) => Self::Array(items.iter().map(Self::from).collect()),
            Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Render `input` as a stable signature string.
pub fn signature(input: &Datum) -> String {
    let mut out = String::new();
    let mut ancestors = Vec::new();
    write_datum(input, &mut out, &mut ancestors);
    out
}

/// Signature of any serializable value.
///
/// Falls back to [`UNSTRINGIFIABLE`] when serialization fails.
pub fn signature_of<T: Serialize + ?Sized>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(value) => signature(&Datum::from(&value)),
        Err(_) => UNSTRINGIFIABLE.to_string(),
    }
}

/// Short hex digest of a signature, for log fields.
pub fn digest(signature: &str) -> String {
    let hash = Sha256::digest(signature.as_bytes());
    hex::encode(&hash[..6])
}

fn write_datum(datum: &Datum, out: &mut String, ancestors: &mut Vec<*const RefCell<Datum>>) {
    match datum {
        Datum::Undefined => write_str(out, UNDEFINED),
        Datum::Function => write_str(out, FUNCTION),
        Datum::Null => out.push_str("null"),
        Datum::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Datum::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Datum::BigInt(i) => write_str(out, &i.to_string()),
        Datum::Float(f) if f.is_finite() => {
            let _ = write!(out, "{f}");
        }
        Datum::Float(_) => out.push_str("null"),
        Datum::Str(s) => write_str(out, s),
        Datum::Date(date) => write_str(out, &date.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Datum::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_datum(item, out, ancestors);
            }
            out.push(']');
        }
        Datum::Object(entries) => {
            let mut sorted: Vec<&(String, Datum)> = entries.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            out.push('{');
            for (i, (key, value)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_str(out, key);
                out.push(':');
                write_datum(value, out, ancestors);
            }
            out.push('}');
        }
        Datum::Shared(node) => {
            let ptr = Rc::as_ptr(node);
            if ancestors.contains(&ptr) {
                write_str(out, CIRCULAR);
                return;
            }
            ancestors.push(ptr);
            match node.try_borrow() {
                Ok(inner) => write_datum(&inner, out, ancestors),
                Err(_) => write_str(out, UNSTRINGIFIABLE),
            }
            ancestors.pop();
        }
    }
}

fn write_str(out: &mut String, s: &str) {
    out.push_str(&Value::String(s.to_string()).to_string());
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn obj(entries: Vec<(&str, Datum)>) -> Datum {
        Datum::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    #[test]
    fn key_order_does_not_matter() {
        let a = obj(vec![("a", Datum::Int(1)), ("b", Datum::Int(2))]);
        let b = obj(vec![("b", Datum::Int(2)), ("a", Datum::Int(1))]);
        assert_eq!(signature(&a), signature(&b));
        assert_eq!(signature(&a), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn same_input_same_output() {
        let value = json!({"filters": {"status": "alive"}, "query": "rick"});
        assert_eq!(signature_of(&value), signature_of(&value));
    }

    #[test]
    fn special_values_use_tokens() {
        let date = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let input = obj(vec![
            ("when", Datum::Date(date)),
            ("big", Datum::BigInt(170_141_183_460_469_231_731_687_303_715_884_105_727)),
            ("cb", Datum::Function),
            ("missing", Datum::Undefined),
        ]);
        assert_eq!(
            signature(&input),
            r#"{"big":"170141183460469231731687303715884105727","cb":"[Function]","missing":"[Undefined]","when":"2024-01-02T03:04:05.000Z"}"#
        );
    }

    #[test]
    fn circular_reference_is_marked() {
        let node = Datum::shared(obj(vec![("name", Datum::Str("root".to_string()))]));
        if let Datum::Object(entries) = &mut *node.borrow_mut() {
            entries.push(("self".to_string(), Datum::Shared(Rc::clone(&node))));
        }
        let sig = signature(&Datum::Shared(Rc::clone(&node)));
        assert_eq!(sig, r#"{"name":"root","self":"[Circular]"}"#);

        // Break the cycle so the test does not leak.
        if let Datum::Object(entries) = &mut *node.borrow_mut() {
            entries.clear();
        }
    }

    #[test]
    fn shared_siblings_are_not_circular() {
        let leaf = Datum::shared(Datum::Int(7));
        let input = Datum::Array(vec![
            Datum::Shared(Rc::clone(&leaf)),
            Datum::Shared(Rc::clone(&leaf)),
        ]);
        assert_eq!(signature(&input), "[7,7]");
    }

    #[test]
    fn digest_is_short_hex() {
        let d = digest("{}");
        assert_eq!(d.len(), 12);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
