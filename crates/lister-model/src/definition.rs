//! Preset definitions describing a remote list source.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Map;
use crate::accessor::{Accessor, Selector};

/// HTTP verb used to fetch a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs handed to a custom request builder.
#[derive(Debug, Clone, Copy)]
pub struct RequestInput<'a> {
    pub filters: &'a Map,
    pub query: &'a str,
    pub cursor: Option<&'a Value>,
}

/// Request parts produced by a custom builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuiltRequest {
    pub params: Map,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
}

/// Signature of a custom request builder.
pub type RequestBuilderFn = dyn Fn(&RequestInput<'_>) -> BuiltRequest + Send + Sync;

/// Where and how a list is fetched.
#[derive(Clone)]
pub struct Source {
    pub endpoint: String,
    pub method: HttpMethod,
    /// Static params merged under the per-request params.
    pub params: Map,
    /// Static headers sent with every request.
    pub headers: BTreeMap<String, String>,
    pub build_request: Option<Arc<RequestBuilderFn>>,
}

impl Source {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: HttpMethod::Get,
            params: Map::new(),
            headers: BTreeMap::new(),
            build_request: None,
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("endpoint", &self.endpoint)
            .field("method", &self.method)
            .field("params", &self.params)
            .field("headers", &self.headers)
            .field("build_request", &self.build_request.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Rules turning a raw item into a [`crate::ListerOption`].
#[derive(Debug, Clone)]
pub struct Mapping {
    pub label: Accessor,
    pub value: Accessor,
    pub description: Option<Accessor>,
    pub icon: Option<Accessor>,
    pub group: Option<Accessor>,
}

impl Default for Mapping {
    fn default() -> Self {
        Self {
            label: Accessor::path("label"),
            value: Accessor::path("value"),
            description: None,
            icon: None,
            group: None,
        }
    }
}

/// Search defaults of a preset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDefaults {
    /// Field searched when the session has no explicit subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Immutable descriptor of a remote list source.
#[derive(Debug, Clone)]
pub struct ListerDefinition {
    pub id: String,
    pub title: String,
    pub source: Source,
    pub selector: Selector,
    pub mapping: Mapping,
    pub search: SearchDefaults,
}

impl ListerDefinition {
    /// Start building a definition for `id` fetched from `endpoint`.
    pub fn builder(id: impl Into<String>, endpoint: impl Into<String>) -> ListerDefinitionBuilder {
        let id = id.into();
        ListerDefinitionBuilder {
            def: Self {
                title: id.clone(),
                id,
                source: Source::new(endpoint),
                selector: Selector::default(),
                mapping: Mapping::default(),
                search: SearchDefaults::default(),
            },
        }
    }
}

/// Builder for [`ListerDefinition`].
#[derive(Debug, Clone)]
pub struct ListerDefinitionBuilder {
    def: ListerDefinition,
}

impl ListerDefinitionBuilder {
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.def.title = title.into();
        self
    }

    #[must_use]
    pub fn method(mut self, method: HttpMethod) -> Self {
        self.def.source.method = method;
        self
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.def.source.params.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.def.source.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn build_request<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestInput<'_>) -> BuiltRequest + Send + Sync + 'static,
    {
        self.def.source.build_request = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn selector(mut self, selector: impl Into<Selector>) -> Self {
        self.def.selector = selector.into();
        self
    }

    #[must_use]
    pub fn label(mut self, accessor: impl Into<Accessor>) -> Self {
        self.def.mapping.label = accessor.into();
        self
    }

    #[must_use]
    pub fn value(mut self, accessor: impl Into<Accessor>) -> Self {
        self.def.mapping.value = accessor.into();
        self
    }

    #[must_use]
    pub fn description(mut self, accessor: impl Into<Accessor>) -> Self {
        self.def.mapping.description = Some(accessor.into());
        self
    }

    #[must_use]
    pub fn icon(mut self, accessor: impl Into<Accessor>) -> Self {
        self.def.mapping.icon = Some(accessor.into());
        self
    }

    #[must_use]
    pub fn group(mut self, accessor: impl Into<Accessor>) -> Self {
        self.def.mapping.group = Some(accessor.into());
        self
    }

    #[must_use]
    pub fn search_default(mut self, field: impl Into<String>) -> Self {
        self.def.search.default = Some(field.into());
        self
    }

    pub fn build(self) -> ListerDefinition {
        self.def
    }
}

/// Mapping section of a preset config entry.
#[derive(Debug, Clone, Deserialize)]
pub struct MappingSpec {
    #[serde(default = "default_label")]
    pub label: Accessor,
    #[serde(default = "default_value")]
    pub value: Accessor,
    #[serde(default)]
    pub description: Option<Accessor>,
    #[serde(default)]
    pub icon: Option<Accessor>,
    #[serde(default)]
    pub group: Option<Accessor>,
}

fn default_label() -> Accessor {
    Accessor::path("label")
}

fn default_value() -> Accessor {
    Accessor::path("value")
}

impl Default for MappingSpec {
    fn default() -> Self {
        Self {
            label: default_label(),
            value: default_value(),
            description: None,
            icon: None,
            group: None,
        }
    }
}

/// A preset as written in a config file.
///
/// Only path and template accessors can be expressed here; presets needing
/// function accessors are built in code with [`ListerDefinition::builder`].
#[derive(Debug, Clone, Deserialize)]
pub struct PresetSpec {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub endpoint: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub selector: Option<Selector>,
    #[serde(default)]
    pub mapping: MappingSpec,
    #[serde(default)]
    pub search: SearchDefaults,
    #[serde(default)]
    pub params: Map,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl From<PresetSpec> for ListerDefinition {
    fn from(spec: PresetSpec) -> Self {
        Self {
            title: spec.title.unwrap_or_else(|| spec.id.clone()),
            id: spec.id,
            source: Source {
                endpoint: spec.endpoint,
                method: spec.method,
                params: spec.params,
                headers: spec.headers,
                build_request: None,
            },
            selector: spec.selector.unwrap_or_default(),
            mapping: Mapping {
                label: spec.mapping.label,
                value: spec.mapping.value,
                description: spec.mapping.description,
                icon: spec.mapping.icon,
                group: spec.mapping.group,
            },
            search: spec.search,
        }
    }
}
