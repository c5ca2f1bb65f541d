//! Accessors and selectors over raw JSON items.
//!
//! An [`Accessor`] turns one raw item into one display field. It is either a
//! dotted property path, a `{field}` template, or a caller-supplied function.
//! The variant is fixed when the definition is built, so nothing is
//! type-checked per item.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::Map;

/// Context passed to function accessors while mapping a fetched list.
#[derive(Debug, Clone, Copy)]
pub struct MappingContext<'a> {
    /// Current search query (empty when none).
    pub query: &'a str,
    /// Filters the list was fetched with.
    pub filters: &'a Map,
}

impl<'a> MappingContext<'a> {
    pub fn new(query: &'a str, filters: &'a Map) -> Self {
        Self { query, filters }
    }
}

/// Signature of a function accessor.
pub type AccessorFn = dyn Fn(&Value, &MappingContext<'_>) -> anyhow::Result<Value> + Send + Sync;

/// Rule for extracting one value from a raw item.
#[derive(Clone, Deserialize)]
#[serde(from = "AccessorSpec")]
pub enum Accessor {
    /// Dotted property path (`"owner.login"`, `"tags.0"`).
    Path(String),
    /// Text with `{path}` placeholders, e.g. `"{species} • {status}"`.
    Template(String),
    /// Arbitrary function of the item and mapping context.
    Function(Arc<AccessorFn>),
}

impl Accessor {
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }

    pub fn template(template: impl Into<String>) -> Self {
        Self::Template(template.into())
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Value, &MappingContext<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }

    /// Resolve this accessor against `item`.
    ///
    /// Missing paths resolve to `Value::Null`; only function accessors can fail.
    pub fn resolve(&self, item: &Value, ctx: &MappingContext<'_>) -> anyhow::Result<Value> {
        match self {
            Self::Path(path) => Ok(resolve_path(item, path).cloned().unwrap_or(Value::Null)),
            Self::Template(template) => Ok(Value::String(render_template(template, item))),
            Self::Function(f) => f(item, ctx),
        }
    }

    /// Short human description, used in log details.
    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => format!("path:{path}"),
            Self::Template(template) => format!("template:{template}"),
            Self::Function(_) => "function".to_string(),
        }
    }
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Template(template) => f.debug_tuple("Template").field(template).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

impl From<&str> for Accessor {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

/// Serialized form of an accessor in preset config files.
#[derive(Deserialize)]
#[serde(untagged)]
enum AccessorSpec {
    Path(String),
    Template { template: String },
}

impl From<AccessorSpec> for Accessor {
    fn from(spec: AccessorSpec) -> Self {
        match spec {
            AccessorSpec::Path(path) => Self::Path(path),
            AccessorSpec::Template { template } => Self::Template(template),
        }
    }
}

/// Signature of a function selector.
pub type SelectorFn = dyn Fn(&Value) -> Option<Vec<Value>> + Send + Sync;

/// Rule for pulling the item array out of a response body.
#[derive(Clone, Deserialize)]
#[serde(from = "String")]
pub enum Selector {
    /// Dotted path; the empty path selects the body itself.
    Path(String),
    Function(Arc<SelectorFn>),
}

impl Selector {
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Option<Vec<Value>> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }

    /// Extract the item array, or `None` when the target is not an array.
    pub fn extract(&self, body: &Value) -> Option<Vec<Value>> {
        match self {
            Self::Path(path) => match resolve_path(body, path) {
                Some(Value::Array(items)) => Some(items.clone()),
                _ => None,
            },
            Self::Function(f) => f(body),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) if path.is_empty() => "<body>".to_string(),
            Self::Path(path) => path.clone(),
            Self::Function(_) => "<function>".to_string(),
        }
    }
}

impl Default for Selector {
    fn default() -> Self {
        Self::Path(String::new())
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

impl From<String> for Selector {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

impl From<&str> for Selector {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

/// Walk a dotted path through objects and arrays.
///
/// Numeric segments index into arrays. Empty segments are skipped, so both
/// `""` and `"."` return `value` itself.
pub fn resolve_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Flatten a value into searchable text.
///
/// Strings are taken as-is, `null` is empty, arrays join their elements'
/// text with spaces and objects render as compact JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join(" "),
        Value::Object(_) => value.to_string(),
    }
}

fn render_template(template: &str, item: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let path = after[..end].trim();
                if let Some(found) = resolve_path(item, path) {
                    out.push_str(&value_text(found));
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
