use crate::scripts::NativeScript;
use std::collections::HashMap;

/// Shared asset store. The logic layer keeps one prototype instance per native script type here so
/// tooling can inspect a type without binding it to an entity.
#[derive(Default)]
pub struct AssetManager {
    native_prototypes: HashMap<String, Box<dyn NativeScript>>,
    native_refs: HashMap<String, usize>,
}

impl AssetManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `prototype` under `key`, replacing an earlier prototype of the same type.
    pub fn insert_native_prototype(&mut self, key: &str, prototype: Box<dyn NativeScript>) {
        self.native_prototypes.insert(key.to_string(), prototype);
        *self.native_refs.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn native_prototype(&self, key: &str) -> Option<&dyn NativeScript> {
        self.native_prototypes.get(key).map(|prototype| prototype.as_ref())
    }

    pub fn native_prototype_as<T: NativeScript>(&self, key: &str) -> Option<&T> {
        self.native_prototype(key)?.as_any().downcast_ref::<T>()
    }

    pub fn has_native_prototype(&self, key: &str) -> bool {
        self.native_prototypes.contains_key(key)
    }

    pub fn native_ref_count(&self, key: &str) -> usize {
        self.native_refs.get(key).copied().unwrap_or(0)
    }

    pub fn release_native_prototype(&mut self, key: &str) -> bool {
        let Some(count) = self.native_refs.get_mut(key) else {
            return false;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.native_refs.remove(key);
            self.native_prototypes.remove(key);
        }
        true
    }

    pub fn native_prototype_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.native_prototypes.keys().cloned().collect();
        keys.sort();
        keys
    }
}
