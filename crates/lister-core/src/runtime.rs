//! The lister runtime: open sessions, mutate them, and tell subscribers.
//!
//! Every action that changes what would be fetched (query in remote or hybrid
//! mode, filters, search target, cursor) compares the session's fetch
//! signature before and after the change and only schedules a run when it
//! differs. The [`Fetcher`] is keyed by session id, so sessions never block or
//! invalidate one another.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use lister_model::{
    Accessor, ErrorCode, ListerOption, Map, Position, PrunePolicy, SearchMode, SearchTarget,
    SelectionMode, SessionId,
};
use serde_json::{Value, json};

use crate::config::RuntimeConfig;
use crate::error::{ListerError, Result};
use crate::fetcher::{Fetcher, RunRequest, StartMode};
use crate::host::{Host, LogLevel};
use crate::pipeline::{DefinitionRef, FetchOptions, FetchOutput, fetch_definition, resolve_definition};
use crate::registry::PresetRegistry;
use crate::search::visible_indices;
use crate::selection::{Selection, SelectionValue};
use crate::session::{SessionState, SessionStore};
use crate::signature::signature_of;

type Listener = Arc<dyn Fn(&RuntimeEvent) + Send + Sync>;

const FETCH_PANICKED_MESSAGE: &str = "Could not load the list. Please try again.";

/// Notification sent to subscribers after a mutation completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    Opened(SessionId),
    Changed(SessionId),
    Focused(SessionId),
    Closed(SessionId),
}

impl RuntimeEvent {
    pub fn session(&self) -> &SessionId {
        match self {
            Self::Opened(id) | Self::Changed(id) | Self::Focused(id) | Self::Closed(id) => id,
        }
    }
}

/// Per-session overrides for [`ListerRuntime::open`].
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub title: Option<String>,
    pub mode: Option<SelectionMode>,
    pub search_mode: Option<SearchMode>,
    pub search_target: Option<SearchTarget>,
    pub query: Option<String>,
    pub permissions: Vec<String>,
    pub position: Option<Position>,
    /// Item key accessor; `id`, then `value` when unset.
    pub key: Option<Accessor>,
    pub prune: Option<PrunePolicy>,
    /// Keys selected when the session opens.
    pub value: Vec<Value>,
    /// Reuse an open session of the same kind with this identity.
    pub identity: Option<String>,
    pub debounce: Option<Duration>,
}

impl OpenOptions {
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: SelectionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    #[must_use]
    pub fn search_mode(mut self, mode: SearchMode) -> Self {
        self.search_mode = Some(mode);
        self
    }

    #[must_use]
    pub fn search_target(mut self, target: SearchTarget) -> Self {
        self.search_target = Some(target);
        self
    }

    #[must_use]
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    #[must_use]
    pub fn permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    #[must_use]
    pub fn position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<Accessor>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn prune(mut self, prune: PrunePolicy) -> Self {
        self.prune = Some(prune);
        self
    }

    #[must_use]
    pub fn value(mut self, keys: Vec<Value>) -> Self {
        self.value = keys;
        self
    }

    #[must_use]
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    #[must_use]
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = Some(debounce);
        self
    }
}

/// What [`ListerRuntime::apply`] hands back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub value: SelectionValue,
    /// Full selected items, resolved from the latest list or the cache.
    pub items: Vec<Value>,
}

/// Handle returned by [`ListerRuntime::subscribe`].
#[must_use = "call `unsubscribe` to stop notifications"]
pub struct Subscription {
    inner: Weak<Inner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner.listeners).retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

struct PendingFetch {
    generation: u64,
    done: Shared<BoxFuture<'static, Option<FetchOutput>>>,
}

struct Inner {
    host: Host,
    registry: Arc<PresetRegistry>,
    config: RuntimeConfig,
    fetcher: Fetcher<FetchOutput, ListerError>,
    store: Mutex<SessionStore>,
    pending: Mutex<HashMap<SessionId, PendingFetch>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
}

/// Session runtime. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ListerRuntime {
    inner: Arc<Inner>,
}

impl fmt::Debug for ListerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListerRuntime")
            .field("sessions", &lock(&self.inner.store).len())
            .field("presets", &self.inner.registry.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl ListerRuntime {
    pub fn new(host: Host, registry: Arc<PresetRegistry>, config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                host,
                registry,
                config,
                fetcher: Fetcher::new(),
                store: Mutex::new(SessionStore::new()),
                pending: Mutex::new(HashMap::new()),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<PresetRegistry> {
        &self.inner.registry
    }

    pub fn host(&self) -> &Host {
        &self.inner.host
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Open a session for `kind` and schedule its first fetch.
    ///
    /// With [`OpenOptions::identity`] set, an open session of the same kind
    /// and identity is focused and reused; its filters are replaced when they
    /// differ. Must be called from within a tokio runtime.
    pub fn open(&self, kind: &str, filters: Map, opts: OpenOptions) -> Result<SessionId> {
        let def = resolve_definition(
            &self.inner.host,
            &self.inner.registry,
            DefinitionRef::Kind(kind.to_string()),
        )?;

        if let Some(identity) = opts.identity.as_deref() {
            let existing = lock(&self.inner.store).find_by_identity(kind, identity);
            if let Some(id) = existing {
                tracing::debug!(session = %id, kind, identity, "reusing lister session");
                self.focus(&id)?;
                self.update_and_refetch(&id, Some(Duration::ZERO), |s| s.filters = filters)?;
                return Ok(id);
            }
        }

        let config = &self.inner.config;
        let mut selection = Selection::new(
            opts.mode.unwrap_or(config.mode),
            opts.prune.unwrap_or(config.prune),
            opts.key,
        );
        selection.set_keys(opts.value);
        let search_target = opts.search_target.unwrap_or_else(|| SearchTarget {
            subject: def.search.default.clone(),
            only: None,
        });

        let id = {
            let mut store = lock(&self.inner.store);
            let id = store.allocate_id();
            store.insert(SessionState {
                id: id.clone(),
                kind: kind.to_string(),
                identity: opts.identity,
                title: opts.title.unwrap_or_else(|| def.title.clone()),
                query: opts.query.unwrap_or_default(),
                search_mode: opts.search_mode.unwrap_or(config.search_mode),
                search_target,
                filters,
                cursor: None,
                permissions: opts.permissions,
                data: Vec::new(),
                options: Vec::new(),
                selection,
                loading: false,
                refreshing: false,
                error_code: None,
                error: None,
                position: opts.position,
                debounce: opts.debounce.unwrap_or_else(|| config.debounce()),
            });
            id
        };
        tracing::debug!(session = %id, kind, "opened lister session");
        self.notify(&RuntimeEvent::Opened(id.clone()));
        self.schedule_fetch(&id, Duration::ZERO, false);
        Ok(id)
    }

    /// Tear down a session without committing. Returns whether it was open.
    pub fn close(&self, id: &SessionId) -> bool {
        let removed = lock(&self.inner.store).remove(id).is_some();
        if !removed {
            return false;
        }
        self.inner.fetcher.reset(id.as_str());
        lock(&self.inner.pending).remove(id);
        tracing::debug!(session = %id, "closed lister session");
        self.notify(&RuntimeEvent::Closed(id.clone()));
        true
    }

    /// Close every session and drop all fetch state.
    pub fn dispose(&self) {
        let closed = lock(&self.inner.store).drain();
        self.inner.fetcher.clear();
        lock(&self.inner.pending).clear();
        for session in closed {
            self.notify(&RuntimeEvent::Closed(session.id));
        }
    }

    pub fn focus(&self, id: &SessionId) -> Result<()> {
        if !lock(&self.inner.store).focus(id) {
            return Err(unknown_session(id));
        }
        self.notify(&RuntimeEvent::Focused(id.clone()));
        Ok(())
    }

    /// Set the search query. Remote and hybrid sessions re-fetch after the
    /// session's debounce; local sessions only re-filter.
    pub fn set_query(&self, id: &SessionId, query: impl Into<String>) -> Result<()> {
        let query = query.into();
        self.update_and_refetch(id, None, |s| s.query = query)
    }

    pub fn set_search_mode(&self, id: &SessionId, mode: SearchMode) -> Result<()> {
        self.update_and_refetch(id, None, |s| s.search_mode = mode)
    }

    pub fn set_search_target(&self, id: &SessionId, target: SearchTarget) -> Result<()> {
        self.update_and_refetch(id, None, |s| s.search_target = target)
    }

    /// Merge `patch` into the filters; `null` values remove a filter.
    pub fn patch_filters(&self, id: &SessionId, patch: Map) -> Result<()> {
        self.update_and_refetch(id, None, |s| {
            for (key, value) in patch {
                if value.is_null() {
                    s.filters.remove(&key);
                } else {
                    s.filters.insert(key, value);
                }
            }
        })
    }

    /// Set the pagination cursor and fetch right away.
    pub fn set_cursor(&self, id: &SessionId, cursor: Option<Value>) -> Result<()> {
        self.update_and_refetch(id, Some(Duration::ZERO), |s| s.cursor = cursor)
    }

    pub fn set_position(&self, id: &SessionId, position: Option<Position>) -> Result<()> {
        self.update(id, |s| s.position = position)
    }

    /// Select `item`. Returns `false` when the item has no key.
    pub fn select(&self, id: &SessionId, item: &Value) -> Result<bool> {
        self.update(id, |s| s.selection.select(item))
    }

    pub fn deselect(&self, id: &SessionId, key: &Value) -> Result<bool> {
        self.update(id, |s| s.selection.deselect(key))
    }

    /// Returns whether `item` is selected afterwards.
    pub fn toggle(&self, id: &SessionId, item: &Value) -> Result<bool> {
        self.update(id, |s| s.selection.toggle(item))
    }

    pub fn clear(&self, id: &SessionId) -> Result<()> {
        self.update(id, |s| s.selection.clear())
    }

    /// Commit the draft selection and close the session.
    pub fn apply(&self, id: &SessionId) -> Result<Committed> {
        let committed = {
            let store = lock(&self.inner.store);
            let session = store.get(id).ok_or_else(|| unknown_session(id))?;
            Committed {
                value: session.selection.value(),
                items: session.selection.selected(&session.data),
            }
        };
        self.close(id);
        Ok(committed)
    }

    /// Discard the draft selection and close the session.
    pub fn cancel(&self, id: &SessionId) -> Result<()> {
        if self.close(id) {
            Ok(())
        } else {
            Err(unknown_session(id))
        }
    }

    /// Re-issue the current fetch, bypassing deduplication.
    pub fn refresh(&self, id: &SessionId) -> Result<()> {
        if lock(&self.inner.store).get(id).is_none() {
            return Err(unknown_session(id));
        }
        self.schedule_fetch(id, Duration::ZERO, true);
        Ok(())
    }

    /// Wait until the session's latest scheduled fetch has settled,
    /// following any run that superseded it meanwhile.
    pub async fn settled(&self, id: &SessionId) {
        loop {
            let pending = {
                let pending = lock(&self.inner.pending);
                pending.get(id).map(|p| (p.generation, p.done.clone()))
            };
            let Some((generation, done)) = pending else {
                return;
            };
            done.await;
            let current = lock(&self.inner.pending).get(id).map(|p| p.generation);
            if current == Some(generation) {
                return;
            }
        }
    }

    pub fn snapshot(&self, id: &SessionId) -> Option<SessionState> {
        lock(&self.inner.store).get(id).cloned()
    }

    /// Options currently visible, after local filtering in local and hybrid
    /// modes.
    pub fn visible(&self, id: &SessionId) -> Option<Vec<ListerOption>> {
        let store = lock(&self.inner.store);
        let session = store.get(id)?;
        Some(
            visible_positions(session)
                .into_iter()
                .filter_map(|index| session.options.get(index).cloned())
                .collect(),
        )
    }

    /// Raw items matching [`ListerRuntime::visible`].
    pub fn visible_items(&self, id: &SessionId) -> Option<Vec<Value>> {
        let store = lock(&self.inner.store);
        let session = store.get(id)?;
        Some(
            visible_positions(session)
                .into_iter()
                .filter_map(|index| session.data.get(index).cloned())
                .collect(),
        )
    }

    pub fn selected_items(&self, id: &SessionId) -> Option<Vec<Value>> {
        let store = lock(&self.inner.store);
        let session = store.get(id)?;
        Some(session.selection.selected(&session.data))
    }

    /// Open session ids, back to front.
    pub fn sessions(&self) -> Vec<SessionId> {
        lock(&self.inner.store).ids()
    }

    /// Focused session.
    pub fn active(&self) -> Option<SessionId> {
        lock(&self.inner.store).active().cloned()
    }

    /// Call `listener` after every mutation.
    pub fn subscribe(&self, listener: impl Fn(&RuntimeEvent) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners).push((id, Arc::new(listener)));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    fn notify(&self, event: &RuntimeEvent) {
        let listeners: Vec<Listener> = lock(&self.inner.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    fn update<R>(&self, id: &SessionId, f: impl FnOnce(&mut SessionState) -> R) -> Result<R> {
        let out = {
            let mut store = lock(&self.inner.store);
            let session = store.get_mut(id).ok_or_else(|| unknown_session(id))?;
            f(session)
        };
        self.notify(&RuntimeEvent::Changed(id.clone()));
        Ok(out)
    }

    fn update_and_refetch(
        &self,
        id: &SessionId,
        debounce: Option<Duration>,
        f: impl FnOnce(&mut SessionState),
    ) -> Result<()> {
        let (changed, debounce) = self.update(id, |s| {
            let before = fetch_signature(s);
            f(s);
            (fetch_signature(s) != before, debounce.unwrap_or(s.debounce))
        })?;
        if changed {
            self.schedule_fetch(id, debounce, false);
        }
        Ok(())
    }

    fn schedule_fetch(&self, id: &SessionId, debounce: Duration, force: bool) {
        let plan = {
            let store = lock(&self.inner.store);
            store.get(id).map(|s| {
                let opts = FetchOptions {
                    kind: Some(s.kind.clone()),
                    query: s.remote_query().to_string(),
                    cursor: s.cursor.clone(),
                    search: None,
                    permissions: s.permissions.clone(),
                    session_id: Some(id.to_string()),
                };
                (fetch_signature(s), s.kind.clone(), s.filters.clone(), opts)
            })
        };
        let Some((signature, kind, filters, opts)) = plan else {
            return;
        };

        let def = match resolve_definition(
            &self.inner.host,
            &self.inner.registry,
            DefinitionRef::Kind(kind),
        ) {
            Ok(def) => def,
            Err(err) => {
                self.record_error(id, &err);
                return;
            }
        };

        // Debounced runs flag loading straight away so the picker can show it.
        let start_mode = if debounce.is_zero() {
            StartMode::OnExec
        } else {
            StartMode::Eager
        };
        let request = RunRequest::new(id.as_str(), signature)
            .debounce(debounce)
            .force(force)
            .start_mode(start_mode)
            .on_start({
                let inner = Arc::downgrade(&self.inner);
                let id = id.clone();
                move || {
                    if let Some(inner) = inner.upgrade() {
                        ListerRuntime { inner }.record_start(&id);
                    }
                }
            })
            .on_success({
                let inner = Arc::downgrade(&self.inner);
                let id = id.clone();
                move |out: &FetchOutput| {
                    if let Some(inner) = inner.upgrade() {
                        ListerRuntime { inner }.record_success(&id, out);
                    }
                }
            })
            .on_error({
                let inner = Arc::downgrade(&self.inner);
                let id = id.clone();
                move |err: &ListerError| {
                    if let Some(inner) = inner.upgrade() {
                        ListerRuntime { inner }.record_error(&id, err);
                    }
                }
            })
            .on_panic({
                let inner = Arc::downgrade(&self.inner);
                let id = id.clone();
                move |message: &str| {
                    if let Some(inner) = inner.upgrade() {
                        ListerRuntime { inner }.record_panic(&id, message);
                    }
                }
            });

        let host = self.inner.host.clone();
        let done = self
            .inner
            .fetcher
            .run(request, move || async move {
                fetch_definition(&host, &def, &filters, &opts).await
            })
            .shared();
        let generation = self.inner.fetcher.generation(id.as_str());

        let mut pending = lock(&self.inner.pending);
        let replace = pending
            .get(id)
            .is_none_or(|current| current.generation != generation);
        if replace {
            pending.insert(id.clone(), PendingFetch { generation, done });
        }
    }

    fn record_start(&self, id: &SessionId) {
        let _ = self.update(id, |s| {
            s.loading = true;
            s.refreshing = !s.data.is_empty();
        });
    }

    fn record_success(&self, id: &SessionId, out: &FetchOutput) {
        let _ = self.update(id, |s| {
            s.data = out.raw_list.clone();
            s.options = out.options_list.clone();
            s.selection.sync_list(&s.data);
            s.loading = false;
            s.refreshing = false;
            s.error_code = None;
            s.error = None;
        });
    }

    /// A fetch task panicked (typically a function accessor); report it as a
    /// failed fetch so the session stops loading.
    fn record_panic(&self, id: &SessionId, message: &str) {
        let kind = lock(&self.inner.store).get(id).map(|s| s.kind.clone());
        self.inner.host.log(
            LogLevel::Error,
            ErrorCode::FetchFailed.as_str(),
            format!("lister fetch task panicked: {message}"),
            json!({ "session": id.as_str(), "kind": kind }),
        );
        let _ = self.update(id, |s| {
            s.loading = false;
            s.refreshing = false;
            s.error_code = Some(ErrorCode::FetchFailed);
            s.error = Some(FETCH_PANICKED_MESSAGE.to_string());
        });
    }

    fn record_error(&self, id: &SessionId, err: &ListerError) {
        tracing::debug!(session = %id, code = %err.code(), "lister session fetch failed");
        let _ = self.update(id, |s| {
            s.loading = false;
            s.refreshing = false;
            s.error_code = Some(err.code());
            s.error = Some(err.user_message().to_string());
        });
    }
}

/// Signature of everything that decides what a session fetches.
///
/// The search target only counts while a query is actually sent.
fn fetch_signature(session: &SessionState) -> String {
    let target = (!session.remote_query().is_empty()).then_some(&session.search_target);
    signature_of(&json!({
        "kind": session.kind,
        "filters": session.filters,
        "query": session.remote_query(),
        "target": target,
        "cursor": session.cursor,
    }))
}

fn visible_positions(session: &SessionState) -> Vec<usize> {
    if !session.search_mode.filters_locally() {
        return (0..session.data.len()).collect();
    }
    visible_indices(
        &session.data,
        &session.query,
        &session.search_target,
        |item| session.selection.key_of(item),
    )
}

fn unknown_session(id: &SessionId) -> ListerError {
    ListerError::UnknownSession { id: id.to_string() }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
