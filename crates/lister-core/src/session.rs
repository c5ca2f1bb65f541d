//! Session state and the store owning it.

use std::collections::BTreeMap;
use std::time::Duration;

use lister_model::{
    ErrorCode, ListerOption, Map, Position, SearchMode, SearchTarget, SelectionMode, SessionId,
};
use serde_json::Value;

use crate::selection::Selection;

/// State of one open picker.
///
/// Only the runtime mutates sessions; the fetcher hands results back and the
/// runtime writes them in.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: SessionId,
    pub kind: String,
    /// Caller-chosen identity for single-instance reuse.
    pub identity: Option<String>,
    pub title: String,
    pub query: String,
    pub search_mode: SearchMode,
    pub search_target: SearchTarget,
    pub filters: Map,
    /// Pagination cursor sent with the next fetch.
    pub cursor: Option<Value>,
    pub permissions: Vec<String>,
    /// Raw items of the last successful fetch.
    pub data: Vec<Value>,
    /// Display options, index-aligned with `data`.
    pub options: Vec<ListerOption>,
    /// Draft selection, committed by `apply`.
    pub selection: Selection,
    pub loading: bool,
    /// `true` while re-fetching with data already on screen.
    pub refreshing: bool,
    pub error_code: Option<ErrorCode>,
    pub error: Option<String>,
    pub position: Option<Position>,
    pub debounce: Duration,
}

impl SessionState {
    pub fn mode(&self) -> SelectionMode {
        self.selection.mode()
    }

    /// Query sent to the server; empty in local mode.
    pub fn remote_query(&self) -> &str {
        if self.search_mode.queries_server() {
            &self.query
        } else {
            ""
        }
    }
}

/// Mapping of session id to state, plus focus order.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: BTreeMap<SessionId, SessionState>,
    /// Back-to-front; the last entry has focus.
    order: Vec<SessionId>,
    next_id: u64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_id(&mut self) -> SessionId {
        self.next_id += 1;
        SessionId::new(format!("lister-{}", self.next_id))
    }

    pub fn insert(&mut self, state: SessionState) {
        let id = state.id.clone();
        self.sessions.insert(id.clone(), state);
        self.focus(&id);
    }

    pub fn get(&self, id: &SessionId) -> Option<&SessionState> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut SessionState> {
        self.sessions.get_mut(id)
    }

    pub fn remove(&mut self, id: &SessionId) -> Option<SessionState> {
        self.order.retain(|other| other != id);
        self.sessions.remove(id)
    }

    /// Open session for `kind` created with the same identity.
    pub fn find_by_identity(&self, kind: &str, identity: &str) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|s| s.kind == kind && s.identity.as_deref() == Some(identity))
            .map(|s| s.id.clone())
    }

    /// Move `id` to the front. Returns `false` for unknown ids.
    pub fn focus(&mut self, id: &SessionId) -> bool {
        if !self.sessions.contains_key(id) {
            return false;
        }
        self.order.retain(|other| other != id);
        self.order.push(id.clone());
        true
    }

    pub fn active(&self) -> Option<&SessionId> {
        self.order.last()
    }

    /// Ids in focus order, back to front.
    pub fn ids(&self) -> Vec<SessionId> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn drain(&mut self) -> Vec<SessionState> {
        self.order.clear();
        std::mem::take(&mut self.sessions).into_values().collect()
    }
}
