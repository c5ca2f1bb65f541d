//! The remote-list pipeline: permission, request, extraction, mapping.
//!
//! Every failure is reported through the host logger with its endpoint and
//! kind before it is returned to the caller.

use std::sync::Arc;

use lister_model::{
    Accessor, HttpRequest, ListerDefinition, ListerOption, Map, MappingContext, RequestInput,
    value_text,
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{ListerError, Result};
use crate::host::{Host, LogLevel, PermissionContext};
use crate::registry::PresetRegistry;

/// Per-call inputs of [`fetch_definition`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Kind reported to the permission evaluator; the definition id when `None`.
    pub kind: Option<String>,
    pub query: String,
    pub cursor: Option<Value>,
    /// Extra search payload merged over the request params.
    pub search: Option<Map>,
    pub permissions: Vec<String>,
    pub session_id: Option<String>,
}

impl FetchOptions {
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }
}

/// Result of a successful fetch: the raw items and their display options.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchOutput {
    pub raw_list: Vec<Value>,
    pub options_list: Vec<ListerOption>,
}

/// A preset kind to look up, or a definition to use directly.
#[derive(Debug, Clone)]
pub enum DefinitionRef {
    Kind(String),
    Definition(Arc<ListerDefinition>),
}

impl From<&str> for DefinitionRef {
    fn from(kind: &str) -> Self {
        Self::Kind(kind.to_string())
    }
}

impl From<String> for DefinitionRef {
    fn from(kind: String) -> Self {
        Self::Kind(kind)
    }
}

impl From<Arc<ListerDefinition>> for DefinitionRef {
    fn from(def: Arc<ListerDefinition>) -> Self {
        Self::Definition(def)
    }
}

impl From<ListerDefinition> for DefinitionRef {
    fn from(def: ListerDefinition) -> Self {
        Self::Definition(Arc::new(def))
    }
}

/// Resolve a kind through `registry` (or take a definition as-is) and fetch it.
pub async fn api_fetch_any(
    host: &Host,
    registry: &PresetRegistry,
    target: impl Into<DefinitionRef>,
    filters: &Map,
    opts: &FetchOptions,
) -> Result<FetchOutput> {
    let def = resolve_definition(host, registry, target.into())?;
    fetch_definition(host, &def, filters, opts).await
}

pub(crate) fn resolve_definition(
    host: &Host,
    registry: &PresetRegistry,
    target: DefinitionRef,
) -> Result<Arc<ListerDefinition>> {
    match target {
        DefinitionRef::Definition(def) => Ok(def),
        DefinitionRef::Kind(kind) => registry.get(&kind).ok_or_else(|| {
            host.log(
                LogLevel::Error,
                "unknown_preset",
                format!("No lister preset registered for kind `{kind}`"),
                json!({ "kind": kind, "known": registry.kinds() }),
            );
            ListerError::UnknownPreset { kind }
        }),
    }
}

/// Run the full pipeline for one definition.
pub async fn fetch_definition(
    host: &Host,
    def: &ListerDefinition,
    filters: &Map,
    opts: &FetchOptions,
) -> Result<FetchOutput> {
    let kind = opts.kind.as_deref().unwrap_or(&def.id);
    let endpoint = def.source.endpoint.as_str();

    check_permissions(host, kind, def, filters, opts)?;

    let request = build_request(def, filters, opts);
    tracing::debug!(
        kind,
        method = %request.method,
        endpoint,
        params = request.params.len(),
        "fetching lister data"
    );

    let body = host.transport.send(request).await.map_err(|source| {
        host.log(
            LogLevel::Error,
            "fetch_failed",
            format!("Request to {endpoint} failed: {source}"),
            json!({ "kind": kind, "endpoint": endpoint }),
        );
        ListerError::FetchFailed {
            endpoint: endpoint.to_string(),
            source,
        }
    })?;

    let raw_list = def.selector.extract(&body).ok_or_else(|| {
        let selector = def.selector.describe();
        host.log(
            LogLevel::Error,
            "extract_not_array",
            format!("Selector `{selector}` did not resolve to an array"),
            json!({ "kind": kind, "endpoint": endpoint, "selector": selector }),
        );
        ListerError::ExtractNotArray {
            selector,
            endpoint: endpoint.to_string(),
        }
    })?;

    let ctx = MappingContext::new(&opts.query, filters);
    let options_list = raw_list
        .iter()
        .enumerate()
        .map(|(index, item)| map_item(def, item, index, &ctx))
        .collect::<Result<Vec<_>>>()
        .inspect_err(|err| {
            host.log(
                LogLevel::Error,
                "mapping_failed",
                err.to_string(),
                json!({ "kind": kind, "endpoint": endpoint }),
            );
        })?;

    tracing::debug!(kind, endpoint, items = raw_list.len(), "lister data mapped");
    Ok(FetchOutput {
        raw_list,
        options_list,
    })
}

fn check_permissions(
    host: &Host,
    kind: &str,
    def: &ListerDefinition,
    filters: &Map,
    opts: &FetchOptions,
) -> Result<()> {
    let ctx = PermissionContext {
        kind,
        endpoint: &def.source.endpoint,
        filters,
        session_id: opts.session_id.as_deref(),
    };
    if host.permissions.allows(&opts.permissions, &ctx) {
        return Ok(());
    }
    host.log(
        LogLevel::Warning,
        "access_denied",
        format!("Access to lister `{kind}` denied"),
        serde_json::to_value(&ctx).unwrap_or(Value::Null),
    );
    Err(ListerError::AccessDenied {
        kind: kind.to_string(),
        endpoint: def.source.endpoint.clone(),
    })
}

/// Build the HTTP request for a definition.
///
/// Without a custom builder the params are the static params, then the
/// filters, then `search` (when the query is non-empty) and `cursor`. The
/// extra search payload is merged last.
pub fn build_request(def: &ListerDefinition, filters: &Map, opts: &FetchOptions) -> HttpRequest {
    let mut params = def.source.params.clone();
    let mut headers = def.source.headers.clone();
    let mut body = None;

    match &def.source.build_request {
        Some(builder) => {
            let built = builder(&RequestInput {
                filters,
                query: &opts.query,
                cursor: opts.cursor.as_ref(),
            });
            params.extend(built.params);
            headers.extend(built.headers);
            body = built.body;
        }
        None => {
            params.extend(filters.iter().map(|(k, v)| (k.clone(), v.clone())));
            if !opts.query.is_empty() {
                params.insert("search".to_string(), Value::String(opts.query.clone()));
            }
            if let Some(cursor) = &opts.cursor {
                params.insert("cursor".to_string(), cursor.clone());
            }
        }
    }

    if let Some(search) = &opts.search {
        params.extend(search.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    HttpRequest {
        method: def.source.method,
        endpoint: def.source.endpoint.clone(),
        params,
        body,
        headers,
    }
}

fn map_item(
    def: &ListerDefinition,
    item: &Value,
    index: usize,
    ctx: &MappingContext<'_>,
) -> Result<ListerOption> {
    let mapping = &def.mapping;
    let resolve = |field: &'static str, accessor: &Accessor| {
        accessor
            .resolve(item, ctx)
            .map_err(|err| ListerError::MappingFailed {
                endpoint: def.source.endpoint.clone(),
                field,
                index,
                message: format!("{err:#}"),
            })
    };
    let optional = |field: &'static str, accessor: Option<&Accessor>| -> Result<Option<String>> {
        let Some(accessor) = accessor else {
            return Ok(None);
        };
        let text = value_text(&resolve(field, accessor)?);
        Ok((!text.is_empty()).then_some(text))
    };

    Ok(ListerOption {
        label: value_text(&resolve("label", &mapping.label)?),
        value: resolve("value", &mapping.value)?,
        description: optional("description", mapping.description.as_ref())?,
        icon: optional("icon", mapping.icon.as_ref())?,
        group: optional("group", mapping.group.as_ref())?,
    })
}

#[cfg(test)]
mod tests {
    use lister_model::BuiltRequest;
    use serde_json::json;

    use super::*;

    fn filters() -> Map {
        let mut filters = Map::new();
        filters.insert("status".to_string(), json!("alive"));
        filters
    }

    #[test]
    fn default_request_merges_filters_query_and_cursor() {
        let def = ListerDefinition::builder("characters", "/api/character")
            .param("page_size", 20)
            .build();
        let opts = FetchOptions {
            query: "rick".to_string(),
            cursor: Some(json!("abc")),
            ..FetchOptions::default()
        };
        let request = build_request(&def, &filters(), &opts);
        assert_eq!(
            Value::Object(request.params),
            json!({"page_size": 20, "status": "alive", "search": "rick", "cursor": "abc"})
        );
        assert!(request.body.is_none());
    }

    #[test]
    fn empty_query_is_not_sent() {
        let def = ListerDefinition::builder("characters", "/api/character").build();
        let request = build_request(&def, &Map::new(), &FetchOptions::default());
        assert!(request.params.is_empty());
    }

    #[test]
    fn custom_builder_and_search_payload() {
        let def = ListerDefinition::builder("users", "/api/users")
            .build_request(|input| {
                let mut params = Map::new();
                params.insert("q".to_string(), json!(input.query));
                BuiltRequest {
                    params,
                    body: Some(json!({"filters": input.filters})),
                    ..BuiltRequest::default()
                }
            })
            .build();
        let mut search = Map::new();
        search.insert("q".to_string(), json!("override"));
        let opts = FetchOptions {
            query: "mo".to_string(),
            search: Some(search),
            ..FetchOptions::default()
        };
        let request = build_request(&def, &filters(), &opts);
        assert_eq!(request.params.get("q"), Some(&json!("override")));
        assert_eq!(request.body, Some(json!({"filters": {"status": "alive"}})));
    }

    #[test]
    fn optional_fields_drop_empty_text() {
        let def = ListerDefinition::builder("x", "/x")
            .label("name")
            .value("id")
            .icon("avatar")
            .build();
        let filters = Map::new();
        let ctx = MappingContext::new("", &filters);
        let option = map_item(&def, &json!({"id": 3, "name": "Summer"}), 0, &ctx).unwrap();
        assert_eq!(option.label, "Summer");
        assert_eq!(option.value, json!(3));
        assert!(option.icon.is_none());
    }
}
