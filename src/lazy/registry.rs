//! Lazy attribute registry.
//!
//! Each [`EntityDef`](crate::EntityDef) owns a [`LazyAttributeSet`]. Declarations
//! are additive and idempotent; nothing is ever removed. A subtype's effective
//! set is the union of its own declarations and every ancestor's.
//!
//! Derived eager column lists are cached per entity and stamped with a global
//! declaration epoch. Any declaration, on any entity, bumps the epoch, which
//! invalidates every cached derivation including those of subtypes.

use indexmap::IndexSet;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static DECLARATION_EPOCH: AtomicU64 = AtomicU64::new(0);

pub(crate) fn current_epoch() -> u64 {
    DECLARATION_EPOCH.load(Ordering::Acquire)
}

/// Attribute names declared lazy directly on one entity
#[derive(Debug, Default)]
pub struct LazyAttributeSet {
    names: RwLock<IndexSet<String>>,
}

impl LazyAttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union-merge `names` into the set, returning the names that were not already present
    pub fn declare<I, S>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = self.names.write();
        let added: Vec<String> = names
            .into_iter()
            .map(Into::into)
            .filter(|name| set.insert(name.clone()))
            .collect();
        if !added.is_empty() {
            DECLARATION_EPOCH.fetch_add(1, Ordering::AcqRel);
        }
        added
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.read().contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }

    /// Snapshot in declaration order
    pub fn names(&self) -> Vec<String> {
        self.names.read().iter().cloned().collect()
    }
}

/// Epoch-stamped cache of an entity's eager column list
#[derive(Debug, Default)]
pub(crate) struct EagerColumnCache {
    slot: RwLock<Option<(u64, Option<Arc<[String]>>)>>,
}

impl EagerColumnCache {
    /// Cached value if still current, else `compute` and store
    pub(crate) fn get_or_compute(
        &self,
        compute: impl FnOnce() -> Option<Arc<[String]>>,
    ) -> Option<Arc<[String]>> {
        let epoch = current_epoch();
        if let Some((stamp, cached)) = self.slot.read().as_ref() {
            if *stamp == epoch {
                return cached.clone();
            }
        }
        let fresh = compute();
        *self.slot.write() = Some((epoch, fresh.clone()));
        fresh
    }
}
