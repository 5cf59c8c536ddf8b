//! Reference registry: stable short handles for structural nodes.
//!
//! A reference, once assigned to a backend node id, stays bound to it until
//! the registry is cleared. References are never reused for a different node
//! within one registry lifetime, which is what makes them safe to hand to a
//! caller that acts on them later.

use std::collections::HashMap;

use pagescope_core_types::BackendNodeId;
use parking_lot::RwLock;
use url::Url;

use crate::errors::PerceiverError;

#[derive(Default)]
struct RegistryInner {
    by_backend: HashMap<BackendNodeId, String>,
    by_ref: HashMap<String, BackendNodeId>,
    next: u64,
}

/// Bidirectional backend-id ↔ reference map, monotonically assigned.
///
/// Owned by one perceiver instance (one inspected target); nothing here is
/// process-global. Callers coordinate resets themselves.
#[derive(Default)]
pub struct RefRegistry {
    inner: RwLock<RegistryInner>,
}

impl RefRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the reference already bound to `id`, or bind the next one.
    pub fn assign(&self, id: BackendNodeId) -> String {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.by_backend.get(&id) {
            return existing.clone();
        }
        inner.next += 1;
        let reference = format!("ref_{}", inner.next);
        inner.by_backend.insert(id, reference.clone());
        inner.by_ref.insert(reference.clone(), id);
        reference
    }

    /// Resolve a reference back to its backend node id. Unknown references
    /// are an error, never a default node.
    pub fn resolve(&self, reference: &str) -> Result<BackendNodeId, PerceiverError> {
        self.inner
            .read()
            .by_ref
            .get(reference)
            .copied()
            .ok_or_else(|| PerceiverError::UnknownRef(reference.to_string()))
    }

    pub fn reference_for(&self, id: BackendNodeId) -> Option<String> {
        self.inner.read().by_backend.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_backend.is_empty()
    }

    /// Empty the registry and restart the sequence. Done before a fresh
    /// full-tree read so references stay short across repeated reads.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_backend.clear();
        inner.by_ref.clear();
        inner.next = 0;
    }
}

/// References survive same-origin navigation churn but not a move to a
/// different origin, where every backend id is guaranteed dead.
pub fn crosses_origin(previous: &str, next: &str) -> bool {
    match (Url::parse(previous), Url::parse(next)) {
        (Ok(prev), Ok(next)) => prev.origin() != next.origin(),
        _ => true,
    }
}
