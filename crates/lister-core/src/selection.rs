//! Selection state that survives list refreshes.
//!
//! Selected keys are kept in order, and every selected item is cached by key
//! so [`Selection::selected`] can still return full objects after the backing
//! list has been replaced by a newer fetch.

use std::collections::{HashMap, HashSet};

use lister_model::{Accessor, Map, MappingContext, PrunePolicy, SelectionMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::signature::{Datum, signature};

/// Committed or draft value of a selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectionValue {
    Single(Option<Value>),
    Multiple(Vec<Value>),
}

/// Ordered, unique selection with an item cache.
#[derive(Debug, Clone)]
pub struct Selection {
    mode: SelectionMode,
    prune: PrunePolicy,
    key: Option<Accessor>,
    keys: Vec<Value>,
    cache: HashMap<String, Value>,
    /// Keys chosen before any list arrived; `PrunePolicy::Missing` keeps them.
    preloaded: HashSet<String>,
    has_list: bool,
}

impl Selection {
    pub fn new(mode: SelectionMode, prune: PrunePolicy, key: Option<Accessor>) -> Self {
        Self {
            mode,
            prune,
            key,
            keys: Vec::new(),
            cache: HashMap::new(),
            preloaded: HashSet::new(),
            has_list: false,
        }
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Resolve the key of `item`.
    ///
    /// Uses the configured accessor, else `id`, else `value`; primitive items
    /// are their own key. Returns `None` when the key is null.
    pub fn key_of(&self, item: &Value) -> Option<Value> {
        let key = match &self.key {
            Some(accessor) => {
                let filters = Map::new();
                accessor
                    .resolve(item, &MappingContext::new("", &filters))
                    .ok()?
            }
            None => match item {
                Value::Object(map) => map
                    .get("id")
                    .filter(|v| !v.is_null())
                    .or_else(|| map.get("value"))
                    .cloned()
                    .unwrap_or(Value::Null),
                other => other.clone(),
            },
        };
        (!key.is_null()).then_some(key)
    }

    /// Select `item`. Returns `false` when the item has no key.
    pub fn select(&mut self, item: &Value) -> bool {
        let Some(key) = self.key_of(item) else {
            return false;
        };
        let text = key_text(&key);
        self.cache.insert(text.clone(), item.clone());
        if !self.has_list {
            self.preloaded.insert(text.clone());
        }
        match self.mode {
            SelectionMode::Single => {
                self.keys.clear();
                self.keys.push(key);
                self.forget_unselected();
            }
            SelectionMode::Multiple => {
                if !self.keys.iter().any(|k| key_text(k) == text) {
                    self.keys.push(key);
                }
            }
        }
        true
    }

    /// Remove `key` from the selection. Returns whether it was selected.
    pub fn deselect(&mut self, key: &Value) -> bool {
        let text = key_text(key);
        let before = self.keys.len();
        self.keys.retain(|k| key_text(k) != text);
        self.forget_unselected();
        before != self.keys.len()
    }

    /// Flip `item`'s selection. Returns whether it is selected afterwards.
    pub fn toggle(&mut self, item: &Value) -> bool {
        let Some(key) = self.key_of(item) else {
            return false;
        };
        if self.is_selected(&key) {
            self.deselect(&key);
            false
        } else {
            self.select(item)
        }
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.preloaded.clear();
        self.cache.clear();
    }

    pub fn is_selected(&self, key: &Value) -> bool {
        let text = key_text(key);
        self.keys.iter().any(|k| key_text(k) == text)
    }

    pub fn keys(&self) -> &[Value] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Seed the selection with bare keys (e.g. a form's current value).
    pub fn set_keys(&mut self, keys: Vec<Value>) {
        self.keys.clear();
        self.preloaded.clear();
        for key in keys.into_iter().filter(|k| !k.is_null()) {
            let text = key_text(&key);
            if self.keys.iter().any(|k| key_text(k) == text) {
                continue;
            }
            if !self.has_list {
                self.preloaded.insert(text);
            }
            self.keys.push(key);
            if self.mode == SelectionMode::Single {
                break;
            }
        }
        self.forget_unselected();
    }

    /// Drop preload marks and cached items of keys no longer selected.
    fn forget_unselected(&mut self) {
        let selected: HashSet<String> = self.keys.iter().map(key_text).collect();
        self.preloaded.retain(|text| selected.contains(text));
        self.cache.retain(|text, _| selected.contains(text));
    }

    /// Refresh cached items from a newly fetched list and apply the prune
    /// policy.
    ///
    /// Pruning only compares against `list`; keys chosen before the first
    /// list arrived are never pruned.
    pub fn sync_list(&mut self, list: &[Value]) {
        self.has_list = true;
        let mut present = HashSet::new();
        for item in list {
            if let Some(key) = self.key_of(item) {
                let text = key_text(&key);
                if self.keys.iter().any(|k| key_text(k) == text) {
                    self.cache.insert(text.clone(), item.clone());
                }
                present.insert(text);
            }
        }
        if self.prune == PrunePolicy::Missing {
            let preloaded = &self.preloaded;
            self.keys.retain(|k| {
                let text = key_text(k);
                present.contains(&text) || preloaded.contains(&text)
            });
            self.forget_unselected();
        }
    }

    /// Selected items, preferring fresh objects from `list` over the cache.
    ///
    /// Keys that were never seen as items are skipped.
    pub fn selected(&self, list: &[Value]) -> Vec<Value> {
        let fresh: HashMap<String, &Value> = list
            .iter()
            .filter_map(|item| self.key_of(item).map(|k| (key_text(&k), item)))
            .collect();
        self.keys
            .iter()
            .filter_map(|key| {
                let text = key_text(key);
                fresh
                    .get(&text)
                    .map(|item| (*item).clone())
                    .or_else(|| self.cache.get(&text).cloned())
            })
            .collect()
    }

    /// Current value in the shape the caller commits.
    pub fn value(&self) -> SelectionValue {
        match self.mode {
            SelectionMode::Single => SelectionValue::Single(self.keys.first().cloned()),
            SelectionMode::Multiple => SelectionValue::Multiple(self.keys.clone()),
        }
    }
}

/// Stable text form of a key, so `1` and `"1"` stay distinct.
pub(crate) fn key_text(key: &Value) -> String {
    signature(&Datum::from(key))
}
