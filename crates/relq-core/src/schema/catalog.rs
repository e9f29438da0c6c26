//! The entity-map registry shared by all statements.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

use super::entity::EntityMap;

/// Source of catalog generation numbers, never reused within a process.
static GENERATIONS: AtomicU64 = AtomicU64::new(0);

fn next_generation() -> u64 {
    GENERATIONS.fetch_add(1, Ordering::Relaxed)
}

/// A registry of entity maps, keyed by entity name.
///
/// Built once at startup and shared behind an `Arc`; lookups are read-only,
/// so no interior locking is needed.
#[derive(Debug)]
pub struct SchemaCatalog {
    entities: HashMap<String, EntityMap>,
    generation: u64,
}

impl Default for SchemaCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            generation: next_generation(),
        }
    }

    /// Register an entity map, replacing any previous map of the same name.
    pub fn register(&mut self, map: EntityMap) -> &mut Self {
        self.entities.insert(map.entity.clone(), map);
        self.generation = next_generation();
        self
    }

    /// Builder-style registration.
    pub fn with_entity(mut self, map: EntityMap) -> Self {
        self.register(map);
        self
    }

    /// Look up an entity map.
    pub fn entity(&self, name: &str) -> Result<&EntityMap> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::UnknownEntity(name.to_string()))
    }

    /// Check whether an entity is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Number of registered entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Process-unique identity of the catalog's current contents. Every
    /// mutation mints a fresh one, so compiled-SQL caches key on it
    /// rather than on the catalog's address.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
