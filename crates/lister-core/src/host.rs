//! Collaborators injected into the pipeline and runtime.
//!
//! The core never talks to the network, decides permissions or writes logs on
//! its own. A [`Host`] bundles the three implementations it calls instead.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use lister_model::{HttpRequest, Map, TransportError};
use serde::Serialize;
use serde_json::Value;

/// Sends a built request and returns the decoded response body.
///
/// Implementations must reject non-2xx responses. Timeouts are the
/// transport's responsibility.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<Value, TransportError>;
}

/// Context a permission evaluator decides on.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionContext<'a> {
    pub kind: &'a str,
    pub endpoint: &'a str,
    pub filters: &'a Map,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
}

/// Pure predicate deciding whether a list may be fetched.
pub trait PermissionEvaluator: Send + Sync {
    fn allows(&self, permissions: &[String], ctx: &PermissionContext<'_>) -> bool;
}

impl<F> PermissionEvaluator for F
where
    F: Fn(&[String], &PermissionContext<'_>) -> bool + Send + Sync,
{
    fn allows(&self, permissions: &[String], ctx: &PermissionContext<'_>) -> bool {
        self(permissions, ctx)
    }
}

/// Evaluator that allows everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionEvaluator for AllowAll {
    fn allows(&self, _permissions: &[String], _ctx: &PermissionContext<'_>) -> bool {
        true
    }
}

/// Severity of a host log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warning,
}

/// Structured entry reported through [`HostLogger`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub code: &'static str,
    pub message: String,
    pub details: Value,
}

/// Fire-and-forget structured logger.
pub trait HostLogger: Send + Sync {
    fn log(&self, entry: LogEntry);
}

/// Logger forwarding entries to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl HostLogger for TracingLogger {
    fn log(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Error => tracing::error!(
                code = entry.code,
                details = %entry.details,
                "{}",
                entry.message
            ),
            LogLevel::Warning => tracing::warn!(
                code = entry.code,
                details = %entry.details,
                "{}",
                entry.message
            ),
        }
    }
}

/// Bundle of injected collaborators.
#[derive(Clone)]
pub struct Host {
    pub transport: Arc<dyn HttpTransport>,
    pub permissions: Arc<dyn PermissionEvaluator>,
    pub logger: Arc<dyn HostLogger>,
}

impl Host {
    /// Host with the given transport, [`AllowAll`] and [`TracingLogger`].
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            permissions: Arc::new(AllowAll),
            logger: Arc::new(TracingLogger),
        }
    }

    #[must_use]
    pub fn with_permissions(mut self, evaluator: Arc<dyn PermissionEvaluator>) -> Self {
        self.permissions = evaluator;
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn HostLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub(crate) fn log(&self, level: LogLevel, code: &'static str, message: String, details: Value) {
        self.logger.log(LogEntry {
            level,
            code,
            message,
            details,
        });
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}
