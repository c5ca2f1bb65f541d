//! Session-level enums and small value types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of an open picker session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a session picks one item or many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    #[default]
    Single,
    Multiple,
}

/// Where the query is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Filter the fetched list client-side only.
    Local,
    /// Send the query to the server.
    #[default]
    Remote,
    /// Send the query to the server and filter the result locally as well.
    Hybrid,
}

impl SearchMode {
    /// Returns whether query changes trigger a new fetch.
    #[must_use]
    pub const fn queries_server(&self) -> bool {
        matches!(self, Self::Remote | Self::Hybrid)
    }

    /// Returns whether the visible list is filtered client-side.
    #[must_use]
    pub const fn filters_locally(&self) -> bool {
        matches!(self, Self::Local | Self::Hybrid)
    }
}

/// What a query is matched against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchTarget {
    /// Field compared against the query; whole item when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Restrict the list to items whose key is in this set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only: Option<Vec<Value>>,
}

impl SearchTarget {
    pub fn subject(field: impl Into<String>) -> Self {
        Self {
            subject: Some(field.into()),
            only: None,
        }
    }
}

/// How selections react to a newly fetched list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrunePolicy {
    /// Keep every selection, resolving missing items from the cache.
    #[default]
    Never,
    /// Drop selections absent from the latest fetched list.
    Missing,
}

/// Screen position of a draggable picker.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}
