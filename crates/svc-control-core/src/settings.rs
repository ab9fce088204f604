//! Categorized key/value settings persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// External categorized key/value store for persisted state
/// (named settings, schedule bindings).
pub trait SettingsStore: Send + Sync {
    /// Read one setting.
    fn get(&self, category: &str, name: &str) -> Option<String>;

    /// Write one setting, creating the category if needed.
    fn set(&self, category: &str, name: &str, value: &str);

    /// Remove one setting. Returns false when it did not exist.
    fn remove(&self, category: &str, name: &str) -> bool;

    /// All known category names.
    fn categories(&self) -> Vec<String>;

    /// All `(name, value)` entries of one category, in name order.
    fn entries(&self, category: &str) -> Vec<(String, String)>;

    /// Flush to the backing medium.
    ///
    /// # Errors
    /// Returns an error when the write fails.
    fn save(&self) -> anyhow::Result<()>;

    /// Re-read from the backing medium, discarding unsaved edits.
    ///
    /// # Errors
    /// Returns an error when the read fails.
    fn load(&self) -> anyhow::Result<()>;
}

struct MemoryInner {
    live: HashMap<String, BTreeMap<String, String>>,
    saved: HashMap<String, BTreeMap<String, String>>,
}

/// In-memory settings store.
///
/// Useful for development and tests. `save` and `load` move state between
/// the live view and a saved snapshot, so reload semantics are observable.
pub struct MemorySettings {
    inner: RwLock<MemoryInner>,
}

impl MemorySettings {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryInner {
                live: HashMap::new(),
                saved: HashMap::new(),
            }),
        }
    }
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, category: &str, name: &str) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .live
            .get(category)
            .and_then(|c| c.get(name))
            .cloned()
    }

    fn set(&self, category: &str, name: &str, value: &str) {
        self.inner
            .write()
            .unwrap()
            .live
            .entry(category.to_string())
            .or_default()
            .insert(name.to_string(), value.to_string());
    }

    fn remove(&self, category: &str, name: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        match inner.live.get_mut(category) {
            Some(entries) => entries.remove(name).is_some(),
            None => false,
        }
    }

    fn categories(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().unwrap().live.keys().cloned().collect();
        names.sort();
        names
    }

    fn entries(&self, category: &str) -> Vec<(String, String)> {
        self.inner
            .read()
            .unwrap()
            .live
            .get(category)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    fn save(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.saved = inner.live.clone();
        Ok(())
    }

    fn load(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.live = inner.saved.clone();
        Ok(())
    }
}
