//! Plugin Registry
//!
//! Holds registered plugins and the symmetric conflict relation between
//! them. Reads are shared, mutation is exclusive: one `RwLock` guards both
//! maps so a round always sees plugins and conflicts from the same moment.

use crate::error::{OrchestratorError, Result};
use crate::plugin::{Plugin, PluginMetadata};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Default)]
struct RegistryState {
    plugins: BTreeMap<String, Arc<dyn Plugin>>,
    conflicts: HashMap<String, BTreeSet<String>>,
}

/// Consistent copy of the registry taken for a single round
#[derive(Clone)]
pub struct RegistrySnapshot {
    /// Sorted by plugin id
    pub plugins: Vec<Arc<dyn Plugin>>,
    pub conflicts: HashMap<String, BTreeSet<String>>,
}

impl RegistrySnapshot {
    pub fn conflicts_with(&self, id: &str) -> Option<&BTreeSet<String>> {
        self.conflicts.get(id)
    }
}

#[derive(Default)]
pub struct PluginRegistry {
    state: RwLock<RegistryState>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. A duplicate id replaces the earlier plugin and keeps its conflicts.
    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        let id = plugin.id().to_string();
        let mut state = self.state.write();
        if state.plugins.insert(id.clone(), plugin).is_some() {
            tracing::debug!(plugin_id = %id, "replaced existing plugin registration");
        } else {
            tracing::debug!(plugin_id = %id, "registered plugin");
        }
    }

    /// Remove a plugin and every conflict edge touching it. False if unknown.
    pub fn unregister(&self, id: &str) -> bool {
        let mut state = self.state.write();
        if state.plugins.remove(id).is_none() {
            return false;
        }
        if let Some(peers) = state.conflicts.remove(id) {
            for peer in peers {
                remove_edge(&mut state.conflicts, &peer, id);
            }
        }
        tracing::debug!(plugin_id = %id, "unregistered plugin");
        true
    }

    /// Replace the conflict set of `id`. The relation is kept symmetric.
    pub fn set_conflicts<I, S>(&self, id: &str, conflicting_ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let wanted: BTreeSet<String> = conflicting_ids.into_iter().map(Into::into).collect();
        let mut state = self.state.write();

        if !state.plugins.contains_key(id) {
            return Err(OrchestratorError::RegistryConflict(format!(
                "plugin '{}' is not registered",
                id
            )));
        }
        if wanted.contains(id) {
            return Err(OrchestratorError::RegistryConflict(format!(
                "plugin '{}' cannot conflict with itself",
                id
            )));
        }
        if let Some(missing) = wanted.iter().find(|peer| !state.plugins.contains_key(*peer)) {
            return Err(OrchestratorError::RegistryConflict(format!(
                "cannot set conflict '{}' <-> '{}': '{}' is not registered",
                id, missing, missing
            )));
        }

        if let Some(previous) = state.conflicts.remove(id) {
            for peer in previous {
                remove_edge(&mut state.conflicts, &peer, id);
            }
        }
        for peer in &wanted {
            state
                .conflicts
                .entry(peer.clone())
                .or_default()
                .insert(id.to_string());
        }
        if !wanted.is_empty() {
            state.conflicts.insert(id.to_string(), wanted);
        }
        Ok(())
    }

    pub fn conflicts_with(&self, id: &str) -> BTreeSet<String> {
        self.state
            .read()
            .conflicts
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.state.read().plugins.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().plugins.contains_key(id)
    }

    /// Metadata of every registered plugin, sorted by id
    pub fn list(&self) -> Vec<PluginMetadata> {
        self.state
            .read()
            .plugins
            .values()
            .map(|p| p.metadata().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().plugins.is_empty()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.read();
        RegistrySnapshot {
            plugins: state.plugins.values().cloned().collect(),
            conflicts: state.conflicts.clone(),
        }
    }
}

fn remove_edge(conflicts: &mut HashMap<String, BTreeSet<String>>, from: &str, to: &str) {
    if let Some(set) = conflicts.get_mut(from) {
        set.remove(to);
        if set.is_empty() {
            conflicts.remove(from);
        }
    }
}
