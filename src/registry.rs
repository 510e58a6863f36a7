use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::buffer::GenerationBuffer;
use crate::error::GenerationError;

/// Process-wide directory of live generations keyed by id.
///
/// The registry is passed explicitly to whoever needs it (coordinator,
/// transports) rather than living in a global. Cloning shares the same map.
#[derive(Clone, Default)]
pub struct GenerationRegistry {
    buffers: Arc<Mutex<HashMap<String, GenerationBuffer>>>,
}

impl GenerationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, GenerationBuffer>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a fresh buffer for `id`.
    ///
    /// Fails with [`GenerationError::DuplicateGeneration`] while another
    /// buffer is registered under the same id.
    pub fn create(&self, id: impl Into<String>) -> Result<GenerationBuffer, GenerationError> {
        let id = id.into();
        let mut buffers = self.lock();
        if buffers.contains_key(&id) {
            tracing::warn!(generation = %id, "duplicate generation rejected");
            return Err(GenerationError::DuplicateGeneration(id));
        }
        let buffer = GenerationBuffer::new(id.clone());
        buffers.insert(id, buffer.clone());
        Ok(buffer)
    }

    /// Look up a live buffer. `None` means the generation already completed
    /// (and was persisted) or never existed.
    pub fn get(&self, id: &str) -> Option<GenerationBuffer> {
        self.lock().get(id).cloned()
    }

    /// Drop the entry for `id`. Returns whether an entry was present, so a
    /// second removal is a harmless `false`.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Number of live generations.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Ids of the live generations, in no particular order.
    pub fn ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_buffers_stay_readable_by_holders() {
        let registry = GenerationRegistry::new();
        let buffer = registry.create("g").unwrap();
        buffer.append("kept");
        assert!(registry.remove("g"));
        assert_eq!(buffer.result(), "kept");
        assert!(registry.is_empty());
    }

    #[test]
    fn id_can_be_reused_after_removal() {
        let registry = GenerationRegistry::new();
        let first = registry.create("g").unwrap();
        registry.remove("g");
        let second = registry.create("g").unwrap();
        assert!(!first.same_buffer(&second));
        assert_eq!(registry.ids(), vec!["g".to_string()]);
    }
}
