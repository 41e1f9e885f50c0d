//! Component registry
//!
//! Maps component names to their capability objects. Registration happens
//! at process start, possibly from several initialization paths, so the map
//! sits behind a single mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::component::{Component, ComponentSpec};
use crate::error::{ComponentError, Result};

/// Name -> component map
#[derive(Default)]
pub struct Registry {
    components: Mutex<HashMap<String, Arc<dyn Component>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn Component>>> {
        // The map is never left half-updated, so a poisoned lock is still usable
        self.components
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a component; fails if the name is taken
    pub fn register(&self, component: Arc<dyn Component>) -> Result<()> {
        let name = component.name().to_string();
        let mut components = self.lock();
        if components.contains_key(&name) {
            return Err(ComponentError::AlreadyRegistered { name });
        }
        tracing::debug!("registered component {}", name);
        components.insert(name, component);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.lock().get(name).cloned()
    }

    /// Lookup that fails with a "did you mean" suggestion
    pub fn require(&self, name: &str) -> Result<Arc<dyn Component>> {
        self.get(name)
            .ok_or_else(|| ComponentError::ComponentNotFound {
                name: name.to_string(),
                suggestion: self.suggest(name),
            })
    }

    /// Registered names in no particular order
    pub fn list(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Registered names sorted alphabetically
    pub fn sorted_names(&self) -> Vec<String> {
        let mut names = self.list();
        names.sort();
        names
    }

    /// Registration metadata of every component, sorted by name
    pub fn specs(&self) -> Vec<ComponentSpec> {
        let mut specs: Vec<ComponentSpec> =
            self.lock().values().map(|c| c.spec().clone()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Remove a component; absent names are ignored
    pub fn unregister(&self, name: &str) {
        self.lock().remove(name);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Closest registered name, if reasonably close
    pub fn suggest(&self, name: &str) -> Option<String> {
        self.lock()
            .keys()
            .map(|candidate| (strsim::jaro_winkler(name, candidate), candidate))
            .filter(|(score, _)| *score > 0.8)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, candidate)| candidate.clone())
    }
}
