//! Write-once artifact slots for a pipeline run.

use crate::core::{Artifact, ArtifactId};
use crate::errors::ArtifactAlreadyProducedError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Holds every artifact registered during one run, keyed by slot name.
///
/// A slot is written at most once and never cleared.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    slots: DashMap<String, Arc<Artifact>>,
}

impl ArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `artifact` under `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot already holds an artifact.
    pub fn put(
        &self,
        slot: &str,
        artifact: Artifact,
    ) -> Result<Arc<Artifact>, ArtifactAlreadyProducedError> {
        match self.slots.entry(slot.to_string()) {
            Entry::Occupied(_) => Err(ArtifactAlreadyProducedError::new(slot)),
            Entry::Vacant(vacant) => {
                let artifact = Arc::new(artifact);
                vacant.insert(artifact.clone());
                Ok(artifact)
            }
        }
    }

    /// Returns the artifact in `slot`.
    #[must_use]
    pub fn get(&self, slot: &str) -> Option<Arc<Artifact>> {
        self.slots.get(slot).map(|a| a.value().clone())
    }

    /// Finds an artifact by content id.
    #[must_use]
    pub fn find(&self, id: &ArtifactId) -> Option<Arc<Artifact>> {
        self.slots
            .iter()
            .find(|entry| entry.value().id() == id)
            .map(|entry| entry.value().clone())
    }

    /// Returns true if the slot holds an artifact.
    #[must_use]
    pub fn contains(&self, slot: &str) -> bool {
        self.slots.contains_key(slot)
    }

    /// Returns the number of registered artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns slot name to artifact id, ordered by slot.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, ArtifactId> {
        self.slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().id().clone()))
            .collect()
    }
}
