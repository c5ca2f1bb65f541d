//! Runtime for searchable, selectable, remote-backed option lists.
//!
//! - [`PresetRegistry`]: named list definitions
//! - [`Fetcher`]: per-key debounce, dedupe and last-request-wins
//! - [`fetch_definition`] / [`api_fetch_any`]: permission, HTTP, extraction, mapping
//! - [`ListerRuntime`]: sessions with selection, search and subscriptions
//!
//! Network access, permission checks and logging are injected through
//! [`Host`].

pub mod config;
pub mod error;
pub mod fetcher;
pub mod host;
pub mod pipeline;
pub mod registry;
pub mod runtime;
pub mod search;
pub mod selection;
pub mod session;
pub mod signature;

pub use config::{ConfigError, HttpConfig, ListerConfig, RuntimeConfig};
pub use error::{ListerError, Result};
pub use fetcher::{Fetcher, Phase, RunRequest, StartMode};
pub use host::{
    AllowAll, Host, HostLogger, HttpTransport, LogEntry, LogLevel, PermissionContext,
    PermissionEvaluator, TracingLogger,
};
pub use pipeline::{
    DefinitionRef, FetchOptions, FetchOutput, api_fetch_any, build_request, fetch_definition,
};
pub use registry::PresetRegistry;
pub use runtime::{Committed, ListerRuntime, OpenOptions, RuntimeEvent, Subscription};
pub use search::{filter_local, visible_indices};
pub use selection::{Selection, SelectionValue};
pub use session::{SessionState, SessionStore};
pub use signature::{Datum, digest, signature, signature_of};
