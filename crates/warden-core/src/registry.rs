//! Named plugin tables with freeze-after-init semantics.
//!
//! Registration happens during process initialization via an explicit
//! `register_all()` per plugin family; after [`PluginRegistry::freeze`] the
//! table is read-only. Duplicate registration fails with `PluginConflict`.
//! Test suites build scoped registries instead of mutating a shared one.

use crate::error::{CoreError, Result};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A mapping from plugin name to descriptor.
///
/// Lock-free reads via DashMap; the frozen flag turns further registration
/// into an error rather than a panic so startup ordering bugs surface as
/// normal errors.
#[derive(Debug)]
pub struct PluginRegistry<D> {
    family: &'static str,
    entries: DashMap<String, Arc<D>>,
    frozen: AtomicBool,
}

impl<D> PluginRegistry<D> {
    pub fn new(family: &'static str) -> Self {
        Self {
            family,
            entries: DashMap::new(),
            frozen: AtomicBool::new(false),
        }
    }

    /// The plugin family this registry holds (`resource`, `filter`, `action`).
    pub fn family(&self) -> &'static str {
        self.family
    }

    pub fn register(&self, name: impl Into<String>, descriptor: D) -> Result<()> {
        let name = name.into();
        if self.frozen.load(Ordering::Acquire) {
            return Err(CoreError::RegistryFrozen {
                registry: self.family.to_string(),
                name,
            });
        }
        match self.entries.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(CoreError::plugin_conflict(self.family, name))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(descriptor));
                Ok(())
            }
        }
    }

    /// Make the registry read-only. Idempotent.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn get(&self, name: &str) -> Option<Arc<D>> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered names, sorted for deterministic schema assembly.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Sorted snapshot of the full table.
    pub fn snapshot(&self) -> Vec<(String, Arc<D>)> {
        let mut entries: Vec<(String, Arc<D>)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
