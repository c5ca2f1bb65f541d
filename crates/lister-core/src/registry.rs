//! Registry of lister presets keyed by kind.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use lister_model::{ListerDefinition, PresetSpec};

/// Mapping of kind to definition, owned by a runtime instance.
///
/// Registration is last-write-wins. Definitions are shared, never mutated.
#[derive(Debug, Default)]
pub struct PresetRegistry {
    presets: RwLock<BTreeMap<String, Arc<ListerDefinition>>>,
}

impl PresetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from config entries, keyed by each entry's id.
    pub fn from_specs(specs: impl IntoIterator<Item = PresetSpec>) -> Self {
        let registry = Self::new();
        for spec in specs {
            let def = ListerDefinition::from(spec);
            registry.register(def.id.clone(), def);
        }
        registry
    }

    /// Register `def` under `kind`, replacing any previous definition.
    pub fn register(&self, kind: impl Into<String>, def: ListerDefinition) -> Arc<ListerDefinition> {
        let kind = kind.into();
        let def = Arc::new(def);
        let mut presets = self.presets.write().unwrap_or_else(|e| e.into_inner());
        if presets.insert(kind.clone(), Arc::clone(&def)).is_some() {
            tracing::debug!(kind = %kind, "replaced lister preset");
        }
        def
    }

    pub fn get(&self, kind: &str) -> Option<Arc<ListerDefinition>> {
        let presets = self.presets.read().unwrap_or_else(|e| e.into_inner());
        presets.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        let presets = self.presets.read().unwrap_or_else(|e| e.into_inner());
        presets.contains_key(kind)
    }

    pub fn remove(&self, kind: &str) -> Option<Arc<ListerDefinition>> {
        let mut presets = self.presets.write().unwrap_or_else(|e| e.into_inner());
        presets.remove(kind)
    }

    /// Registered kinds in sorted order.
    pub fn kinds(&self) -> Vec<String> {
        let presets = self.presets.read().unwrap_or_else(|e| e.into_inner());
        presets.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let presets = self.presets.read().unwrap_or_else(|e| e.into_inner());
        presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_registration_wins() {
        let registry = PresetRegistry::new();
        registry.register("users", ListerDefinition::builder("users", "/v1/users").build());
        registry.register("users", ListerDefinition::builder("users", "/v2/users").build());

        let def = registry.get("users").unwrap();
        assert_eq!(def.source.endpoint, "/v2/users");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_kind_is_none() {
        let registry = PresetRegistry::new();
        assert!(registry.get("missing").is_none());
        assert!(!registry.contains("missing"));
        assert!(registry.is_empty());
    }

    #[test]
    fn registries_are_independent() {
        let a = PresetRegistry::new();
        let b = PresetRegistry::new();
        a.register("x", ListerDefinition::builder("x", "/x").build());
        assert!(a.contains("x"));
        assert!(!b.contains("x"));
    }
}
