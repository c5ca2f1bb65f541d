//! Data model shared by the lister crates.
//!
//! Everything here is plain data: preset definitions and their accessors,
//! the option shape handed to pickers, session-level enums and the
//! HTTP request/response contract. Behavior lives in `lister-core`.

pub mod accessor;
pub mod definition;
pub mod error;
pub mod http;
pub mod option;
pub mod session;

pub use accessor::{Accessor, MappingContext, Selector, resolve_path, value_text};
pub use definition::{
    BuiltRequest, HttpMethod, ListerDefinition, ListerDefinitionBuilder, Mapping, MappingSpec,
    PresetSpec, RequestBuilderFn, RequestInput, SearchDefaults, Source,
};
pub use error::{ErrorCode, TransportError};
pub use http::HttpRequest;
pub use option::ListerOption;
pub use session::{Position, PrunePolicy, SearchMode, SearchTarget, SelectionMode, SessionId};

/// JSON object used for filters, params and log details.
pub type Map = serde_json::Map<String, serde_json::Value>;
