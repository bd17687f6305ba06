//! The compiled policy cache.
//!
//! Policies are stored by kind and name behind a single reader/writer lock.
//! An update replaces the whole entry with a freshly compiled policy; a
//! compiled policy is never patched in place. Every mutation bumps the
//! cache generation, so readers can tell whether a snapshot is stale.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dike_compiler::CompiledPolicy;
use dike_core::{ErrorList, PolicyKind};
use parking_lot::RwLock;
use tracing::{info, warn};

/// Identifies a cached policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyKey {
    /// Policy kind.
    pub kind: PolicyKind,
    /// Policy name.
    pub name: String,
}

impl PolicyKey {
    /// Creates a key.
    #[must_use]
    pub fn new(kind: PolicyKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A cached policy and the generation that installed it.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The compiled policy.
    pub policy: Arc<CompiledPolicy>,
    /// Cache generation at install time.
    pub generation: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    generation: u64,
    entries: HashMap<PolicyKey, CacheEntry>,
}

/// Compiled policies by kind and name.
#[derive(Debug, Default)]
pub struct PolicyCache {
    state: RwLock<CacheState>,
}

impl PolicyCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a policy, replacing any entry with the same kind and name.
    /// Returns the new generation.
    pub fn install(&self, policy: CompiledPolicy) -> u64 {
        let key = PolicyKey::new(policy.kind, policy.name.clone());
        let policy = Arc::new(policy);
        let mut state = self.state.write();
        state.generation += 1;
        let generation = state.generation;
        let replaced = state
            .entries
            .insert(key.clone(), CacheEntry { policy, generation })
            .is_some();
        drop(state);
        info!(policy = %key, generation, replaced, "Installed policy");
        generation
    }

    /// Removes a policy. Returns true if it was cached.
    pub fn remove(&self, key: &PolicyKey) -> bool {
        let mut state = self.state.write();
        let removed = state.entries.remove(key).is_some();
        if removed {
            state.generation += 1;
        }
        let generation = state.generation;
        drop(state);
        if removed {
            info!(policy = %key, generation, "Removed policy");
        }
        removed
    }

    /// Removes a policy whose new spec failed to compile, so the stale
    /// version does not keep being enforced.
    pub fn reject(&self, key: &PolicyKey, errors: Option<&ErrorList>) {
        let removed = self.remove(key);
        match errors {
            Some(errors) => warn!(policy = %key, removed, %errors, "Dropped policy that failed to compile"),
            None => warn!(policy = %key, removed, "Dropped policy that failed to compile"),
        }
    }

    /// Returns a cached policy.
    #[must_use]
    pub fn get(&self, key: &PolicyKey) -> Option<Arc<CompiledPolicy>> {
        self.state.read().entries.get(key).map(|entry| entry.policy.clone())
    }

    /// Returns the cached policies of the given kinds, ordered by kind and
    /// name.
    #[must_use]
    pub fn snapshot(&self, kinds: &[PolicyKind]) -> Vec<Arc<CompiledPolicy>> {
        let state = self.state.read();
        let mut entries: Vec<(&PolicyKey, &CacheEntry)> = state
            .entries
            .iter()
            .filter(|(key, _)| kinds.contains(&key.kind))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter().map(|(_, entry)| entry.policy.clone()).collect()
    }

    /// Returns a cache entry with its install generation.
    #[must_use]
    pub fn entry(&self, key: &PolicyKey) -> Option<CacheEntry> {
        self.state.read().entries.get(key).cloned()
    }

    /// The current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Number of cached policies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns true if no policy is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
