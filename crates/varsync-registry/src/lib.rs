//! A keyed, build-once-at-startup, lock-free-read plug-in table.
//!
//! The Bundle names platforms and datasources by a `kind` string
//! (`"github"`, `"mongo"`, ...); the Main Worker and Sync Worker need to
//! turn that string into a concrete adapter instance without a `match` over
//! every provider baked into `varsync-core`. A [`Registry<T>`] is built once
//! at process startup from whatever factories the binary wires up, then
//! handed out as an `Arc` — every subsequent lookup is a plain `HashMap` read
//! behind no lock, because the table never mutates after [`RegistryBuilder::build`].
//!
//! This crate is deliberately generic over the trait object type `T`
//! (`dyn SourcePlatform`, `dyn Sink`, ...) so it has no dependency on the
//! adapter traits themselves; those live in `varsync-core`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};

/// An immutable name → instance table, safe to share across worker threads
/// via `Arc<Registry<T>>` with no locking on the read path.
#[derive(Debug)]
pub struct Registry<T: ?Sized> {
    entries: HashMap<String, Arc<T>>,
}

impl<T: ?Sized> Registry<T> {
    /// Look up an entry by its `kind` name.
    pub fn get(&self, kind: &str) -> Option<Arc<T>> {
        self.entries.get(kind).cloned()
    }

    /// Look up an entry, producing an error that names the kind and the
    /// full set of registered kinds if it is missing.
    pub fn require(&self, kind: &str) -> Result<Arc<T>> {
        self.get(kind).ok_or_else(|| {
            let mut known: Vec<&str> = self.entries.keys().map(String::as_str).collect();
            known.sort_unstable();
            anyhow::anyhow!("no adapter registered for kind {kind:?}; known kinds: {known:?}")
        })
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accumulates entries before freezing them into a [`Registry`].
#[derive(Debug)]
pub struct RegistryBuilder<T: ?Sized> {
    entries: HashMap<String, Arc<T>>,
}

impl<T: ?Sized> Default for RegistryBuilder<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T: ?Sized> RegistryBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under `kind`. Registering the same kind twice is
    /// a startup-time configuration error, not silently overwritten, since a
    /// duplicate almost always means two adapters were wired up for the
    /// same provider name by mistake.
    pub fn insert(mut self, kind: impl Into<String>, value: Arc<T>) -> Result<Self> {
        let kind = kind.into();
        if self.entries.contains_key(&kind) {
            bail!("adapter kind {kind:?} is already registered");
        }
        self.entries.insert(kind, value);
        Ok(self)
    }

    pub fn build(self) -> Registry<T> {
        Registry {
            entries: self.entries,
        }
    }
}
