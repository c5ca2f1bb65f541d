//! Client-side filtering of an already fetched list.

use std::collections::HashSet;

use lister_model::{SearchTarget, resolve_path, value_text};
use serde_json::Value;

use crate::selection::key_text;

/// Indices of the items in `data` visible for `query` and `target`.
///
/// 1. `target.only` restricts to items whose key is in the allow-set.
/// 2. An empty query keeps everything left.
/// 3. With a subject field, the field's text is matched.
/// 4. Otherwise the whole item's text is matched.
///
/// Matching is a case-insensitive substring test. Pure: no fetch, no state.
pub fn visible_indices<K>(data: &[Value], query: &str, target: &SearchTarget, key_of: K) -> Vec<usize>
where
    K: Fn(&Value) -> Option<Value>,
{
    let allowed: Option<HashSet<String>> = target
        .only
        .as_ref()
        .map(|only| only.iter().map(key_text).collect());
    let needle = query.to_lowercase();

    data.iter()
        .enumerate()
        .filter(|&(_, item)| match &allowed {
            Some(allowed) => key_of(item).is_some_and(|key| allowed.contains(&key_text(&key))),
            None => true,
        })
        .filter(|&(_, item)| needle.is_empty() || haystack(item, target).contains(&needle))
        .map(|(index, _)| index)
        .collect()
}

/// Convenience wrapper returning the visible items themselves.
pub fn filter_local<K>(data: &[Value], query: &str, target: &SearchTarget, key_of: K) -> Vec<Value>
where
    K: Fn(&Value) -> Option<Value>,
{
    visible_indices(data, query, target, key_of)
        .into_iter()
        .map(|index| data[index].clone())
        .collect()
}

fn haystack(item: &Value, target: &SearchTarget) -> String {
    let text = match target.subject.as_deref() {
        Some(subject) => resolve_path(item, subject).map(value_text).unwrap_or_default(),
        None => value_text(item),
    };
    text.to_lowercase()
}
