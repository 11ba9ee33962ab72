//! A named registry of multiplexers.
//!
//! Pools are configured by member names; the registry is where those names are
//! resolved to running multiplexers.

use fxhash::FxHashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{message::Message, multiplexer::Multiplexer};

/// Running multiplexers by name.
///
/// The [`RwLock`] allows for concurrent lookups and exclusive registration.
pub struct Registry<M: Message> {
    entries: RwLock<FxHashMap<String, Arc<Multiplexer<M>>>>,
}

impl<M: Message> Default for Registry<M> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
        }
    }
}

impl<M: Message> Registry<M> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty registry, and return the atomic reference to it.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a multiplexer under its own name.
    ///
    /// Returns the multiplexer previously registered under that name, if any.
    pub async fn register(&self, multiplexer: Arc<Multiplexer<M>>) -> Option<Arc<Multiplexer<M>>> {
        let name = multiplexer.name().to_owned();
        let previous = self.entries.write().await.insert(name, multiplexer);

        if previous.is_some() {
            logger::warn!("Replaced a multiplexer already registered under the same name.");
        }
        previous
    }

    /// Remove a multiplexer by name.
    pub async fn unregister(&self, name: &str) -> Option<Arc<Multiplexer<M>>> {
        self.entries.write().await.remove(name)
    }

    /// Look up a multiplexer by name.
    pub async fn get(&self, name: &str) -> Option<Arc<Multiplexer<M>>> {
        self.entries.read().await.get(name).cloned()
    }

    /// Check if a name is registered.
    pub async fn contains(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }

    /// Get the registered names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names = self.entries.read().await.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Get the number of registered multiplexers.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Return if the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
